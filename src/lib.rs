#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate estimates empirical probability distributions over a fixed set of binary random
//! variables, and the [mutual information][] between groups of those variables.
//!
//! [mutual information]: https://en.wikipedia.org/wiki/Mutual_information
//!
//! Structure-learning algorithms, such as the [Chow-Liu][] tree construction, need to score many
//! candidate pairs of variables against the same observations. So the [`Estimator`] computes the
//! single-variable marginal probabilities once, up front, and then answers any number of
//! [`Estimator::i_hat`] queries against them. The marginals can be saved and restored so that
//! repeated runs over the same data skip that pass.
//!
//! [Chow-Liu]: https://en.wikipedia.org/wiki/Chow%E2%80%93Liu_tree
//!
//! ```
//! use binary_mi::{Dataset, Estimator};
//!
//! let data = Dataset::from_rows(&[[0u8, 0], [0, 1], [1, 0], [1, 1]])?;
//! let estimator = Estimator::new(&data);
//!
//! assert_eq!(estimator.count(&[(0, 0)])?, 2);
//! assert_eq!(estimator.p_hat(&[(0, 1), (1, 1)])?, 0.25);
//! assert_eq!(estimator.i_hat(&[0, 1])?, 0.0);
//! # Ok::<(), binary_mi::Error>(())
//! ```

use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, ArrayView2};
use smallvec::SmallVec;
use statrs::distribution::{ChiSquared, Univariate};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::mem::size_of;
use std::path::Path;

/// Every way an operation in this crate can fail.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A count or probability was requested for an assignment which constrains no variables.
    #[error("an assignment must constrain at least one variable")]
    EmptyAssignment,

    /// A variable index was not less than the number of variables available.
    #[error("variable {variable} is out of range; there are only {variables} variables")]
    UnknownVariable {
        /// The index that was requested.
        variable: usize,
        /// The number of variables in the dataset or marginal table that was consulted.
        variables: usize,
    },

    /// A joint state over this many variables can't be encoded as a single `u64`.
    #[error("can't enumerate joint states over {0} variables")]
    TooManyVariables(usize),

    /// Rows passed to [`Dataset::from_rows`] did not all have the same width.
    #[error("row {row} has {got} values, but the first row has {expected}")]
    RaggedRow {
        /// Index of the first row whose width differed.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width of the offending row.
        got: usize,
    },

    /// A persisted marginal table was not a whole number of rows long.
    #[error("marginal table is {0} bytes long, which is not a whole number of rows")]
    MalformedTable(usize),

    /// The storage layer failed while saving or loading a marginal table.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An immutable matrix of observations: one row per sample, one column per binary variable.
///
/// Values are not validated. Anything other than 0 or 1 is kept as-is, and simply never matches
/// a constraint asking for 0 or 1.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    samples: Array2<u8>,
}

impl Dataset {
    /// Wraps a matrix of shape (samples, variables).
    pub fn new(samples: Array2<u8>) -> Self {
        Dataset { samples }
    }

    /// Builds a dataset from a sequence of equal-width rows.
    ///
    /// ```
    /// use binary_mi::{Dataset, Error};
    ///
    /// let data = Dataset::from_rows(&[[0u8, 1, 1], [1, 0, 1]])?;
    /// assert_eq!(data.sample_size(), 2);
    /// assert_eq!(data.variable_count(), 3);
    ///
    /// let ragged = Dataset::from_rows(&[vec![0u8, 1], vec![1]]);
    /// assert!(matches!(ragged, Err(Error::RaggedRow { row: 1, expected: 2, got: 1 })));
    /// # Ok::<(), binary_mi::Error>(())
    /// ```
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<Self, Error> {
        let expected = rows.first().map_or(0, |row| row.as_ref().len());
        if let Some((row, got)) = rows
            .iter()
            .map(|row| row.as_ref().len())
            .enumerate()
            .find(|(_, len)| *len != expected)
        {
            return Err(Error::RaggedRow { row, expected, got });
        }

        let samples = Array2::from_shape_fn((rows.len(), expected), |(sample, variable)| {
            rows[sample].as_ref()[variable]
        });
        Ok(Dataset { samples })
    }

    /// The number of samples, N.
    pub fn sample_size(&self) -> usize {
        self.samples.nrows()
    }

    /// The number of variables, n.
    pub fn variable_count(&self) -> usize {
        self.samples.ncols()
    }

    /// A view of the whole matrix.
    pub fn samples(&self) -> ArrayView2<'_, u8> {
        self.samples.view()
    }

    /// All observations of one variable.
    ///
    /// ```
    /// use binary_mi::{Dataset, Error};
    ///
    /// let data = Dataset::from_rows(&[[0u8, 1], [1, 1], [0, 0]])?;
    /// assert_eq!(data.column(0)?.to_vec(), vec![0, 1, 0]);
    /// assert!(matches!(data.column(2), Err(Error::UnknownVariable { variable: 2, .. })));
    /// # Ok::<(), binary_mi::Error>(())
    /// ```
    pub fn column(&self, variable: usize) -> Result<ArrayView1<'_, u8>, Error> {
        self.check_variable(variable)?;
        Ok(self.samples.column(variable))
    }

    fn check_variable(&self, variable: usize) -> Result<(), Error> {
        if variable < self.variable_count() {
            Ok(())
        } else {
            Err(Error::UnknownVariable {
                variable,
                variables: self.variable_count(),
            })
        }
    }

    /// Counts the samples in which every listed variable takes its assigned value.
    ///
    /// If the same variable is listed twice with different values, no sample can match. Listing
    /// it twice with the same value is the same as listing it once.
    ///
    /// ```
    /// use binary_mi::{Dataset, Error};
    ///
    /// let data = Dataset::from_rows(&[[0u8, 0], [0, 1], [1, 0], [1, 0]])?;
    /// assert_eq!(data.count(&[(0, 0)])?, 2);
    /// assert_eq!(data.count(&[(0, 0), (1, 0)])?, 1);
    /// assert_eq!(data.count(&[(0, 1), (1, 1)])?, 0);
    /// assert_eq!(data.count(&[(1, 2)])?, 0);
    /// assert!(matches!(data.count(&[]), Err(Error::EmptyAssignment)));
    /// # Ok::<(), binary_mi::Error>(())
    /// ```
    pub fn count(&self, assignment: &[(usize, u8)]) -> Result<usize, Error> {
        if assignment.is_empty() {
            return Err(Error::EmptyAssignment);
        }
        for (variable, _) in assignment.iter() {
            self.check_variable(*variable)?;
        }

        Ok(self
            .samples
            .rows()
            .into_iter()
            .filter(|sample| {
                assignment
                    .iter()
                    .all(|(variable, value)| sample[*variable] == *value)
            })
            .count())
    }

    /// Tallies the joint states of the given variables in one pass over the samples.
    ///
    /// Each key encodes one assignment by binary counting, with the first listed variable as the
    /// most significant bit. Only states that actually occur are present, and samples where any of
    /// the variables is neither 0 nor 1 are not counted at all. So for every key, the count is
    /// exactly what [`Dataset::count`] returns for the corresponding assignment.
    ///
    /// ```
    /// use binary_mi::Dataset;
    ///
    /// let data = Dataset::from_rows(&[[0u8, 0], [0, 1], [1, 0], [1, 0]])?;
    /// let cells = data.joint_counts(&[0, 1])?;
    /// assert_eq!(cells.into_iter().collect::<Vec<_>>(), vec![(0b00, 1), (0b01, 1), (0b10, 2)]);
    /// # Ok::<(), binary_mi::Error>(())
    /// ```
    pub fn joint_counts(&self, variables: &[usize]) -> Result<BTreeMap<u64, usize>, Error> {
        if variables.is_empty() {
            return Err(Error::EmptyAssignment);
        }
        if variables.len() > u64::BITS as usize {
            return Err(Error::TooManyVariables(variables.len()));
        }
        for variable in variables.iter() {
            self.check_variable(*variable)?;
        }

        let mut cells = BTreeMap::new();
        'samples: for sample in self.samples.rows() {
            let mut state = 0u64;
            for variable in variables.iter() {
                let bit = match sample[*variable] {
                    0 => 0,
                    1 => 1,
                    _ => continue 'samples,
                };
                state = state << 1 | bit;
            }
            *cells.entry(state).or_insert(0) += 1;
        }
        Ok(cells)
    }
}

/// The per-variable probabilities of taking the value 0 or 1.
///
/// Row `rv` holds `(P(rv = 0), P(rv = 1))`, and the second column is always computed as the
/// complement of the first.
#[derive(Clone, Debug, PartialEq)]
pub struct MarginalTable(Array2<f64>);

const ROW_BYTES: usize = 2 * size_of::<f64>();

impl MarginalTable {
    /// Computes every variable's marginal from the samples.
    ///
    /// This takes time proportional to the size of the dataset.
    pub fn compute(data: &Dataset) -> Self {
        let variables = data.variable_count();
        info!("Computing marginals for {} random variables...", variables);

        let sample_size = data.sample_size() as f64;
        let mut table = Array2::<f64>::zeros((variables, 2));
        for (observations, mut row) in data.samples.columns().into_iter().zip(table.rows_mut()) {
            let zeros = observations.iter().filter(|value| **value == 0).count();
            let p = zeros as f64 / sample_size;
            row[0] = p;
            row[1] = 1.0 - p;
        }
        MarginalTable(table)
    }

    /// Builds a table from explicit `(P(0), P(1))` rows, taken verbatim.
    pub fn from_rows(rows: &[[f64; 2]]) -> Self {
        MarginalTable(Array2::from_shape_fn((rows.len(), 2), |(rv, value)| {
            rows[rv][value]
        }))
    }

    /// The number of variables in this table.
    pub fn len(&self) -> usize {
        self.0.nrows()
    }

    /// Returns `true` if the table describes no variables.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The probability that `variable` takes `value`, or `None` if either is out of range.
    ///
    /// ```
    /// use binary_mi::MarginalTable;
    ///
    /// let table = MarginalTable::from_rows(&[[0.25, 0.75]]);
    /// assert_eq!(table.get(0, 1), Some(0.75));
    /// assert_eq!(table.get(0, 2), None);
    /// assert_eq!(table.get(1, 0), None);
    /// ```
    pub fn get(&self, variable: usize, value: u8) -> Option<f64> {
        self.0.get((variable, usize::from(value))).copied()
    }

    /// A view of the (variables, 2) matrix.
    pub fn as_array(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    /// Writes the table as row-major little-endian `f64`s, with no header.
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        for p in self.0.iter() {
            out.write_all(&p.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads back a table written by [`MarginalTable::write_to`].
    ///
    /// The number of rows is implied by the length of the input, so any input that is a whole
    /// number of rows long is accepted.
    pub fn read_from<R: Read>(mut input: R) -> Result<Self, Error> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        if bytes.len() % ROW_BYTES != 0 {
            return Err(Error::MalformedTable(bytes.len()));
        }

        let values: Vec<f64> = bytes
            .chunks_exact(size_of::<f64>())
            .map(|chunk| {
                let mut raw = [0; size_of::<f64>()];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Ok(MarginalTable(Array2::from_shape_fn(
            (bytes.len() / ROW_BYTES, 2),
            |(rv, value)| values[2 * rv + value],
        )))
    }

    /// Saves the table to `path`, replacing anything already there.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        info!("Saving marginals as {:?}...", path);
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Loads a table previously written by [`MarginalTable::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        MarginalTable::read_from(BufReader::new(File::open(path)?))
    }
}

/// The result of testing whether a group of variables is mutually independent.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct IndependenceTest {
    /// The estimate from [`Estimator::i_hat`], in nats.
    pub information: f64,

    /// The degrees of freedom separating the saturated model of these variables from the model
    /// where they are all independent: `2^k - 1 - k`.
    pub degrees_of_freedom: f64,

    /// The probability that you'd be making a mistake if you claimed that these variables are not
    /// independent, from a [G-test][] against the chi-squared distribution. Smaller values are
    /// stronger evidence of dependence.
    ///
    /// [G-test]: https://en.wikipedia.org/wiki/G-test
    pub alpha: f64,
}

/// Holds the minimum state necessary for efficiently scoring many groups of variables from the
/// same data.
///
/// An estimator borrows its [`Dataset`] and owns its [`MarginalTable`], and never changes after
/// construction. It holds no file or logging handles, so it can be cloned or shared across as many
/// threads as you like.
#[derive(Clone, Debug)]
pub struct Estimator<'a> {
    data: &'a Dataset,
    marginals: MarginalTable,
}

impl Estimator<'_> {
    /// Creates an estimator, computing marginals for every variable in `data`.
    pub fn new<'a>(data: &'a Dataset) -> Estimator<'a> {
        Estimator {
            data,
            marginals: MarginalTable::compute(data),
        }
    }

    /// Creates an estimator using marginals previously persisted with [`Estimator::save`].
    ///
    /// The table is trusted as-is. In particular nothing checks that it was computed from the same
    /// data, or even that it has the same number of variables.
    pub fn restore<'a, P: AsRef<Path>>(data: &'a Dataset, path: P) -> Result<Estimator<'a>, Error> {
        Ok(Estimator::with_marginals(data, MarginalTable::load(path)?))
    }

    /// Creates an estimator from an existing marginal table, which is trusted as-is.
    pub fn with_marginals<'a>(data: &'a Dataset, marginals: MarginalTable) -> Estimator<'a> {
        if marginals.len() != data.variable_count() {
            warn!(
                "marginal table has {} variables but the data has {}",
                marginals.len(),
                data.variable_count()
            );
        }
        Estimator { data, marginals }
    }

    /// The data this estimator was built from.
    pub fn data(&self) -> &Dataset {
        self.data
    }

    /// The marginal probabilities this estimator compares joint probabilities against.
    pub fn marginals(&self) -> &MarginalTable {
        &self.marginals
    }

    /// Persists the marginal table so that [`Estimator::restore`] can skip recomputing it.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        self.marginals.save(path)
    }

    /// Counts the samples matching every `(variable, value)` pair. See [`Dataset::count`].
    pub fn count(&self, assignment: &[(usize, u8)]) -> Result<usize, Error> {
        self.data.count(assignment)
    }

    /// The fraction of samples matching every `(variable, value)` pair.
    ///
    /// If the dataset has no samples, the result is NaN.
    ///
    /// ```
    /// use binary_mi::{Dataset, Estimator};
    ///
    /// let data = Dataset::from_rows(&[[0u8, 0], [0, 1], [1, 0], [1, 0]])?;
    /// let estimator = Estimator::new(&data);
    /// assert_eq!(estimator.p_hat(&[(1, 0)])?, 0.75);
    /// # Ok::<(), binary_mi::Error>(())
    /// ```
    pub fn p_hat(&self, assignment: &[(usize, u8)]) -> Result<f64, Error> {
        Ok(self.count(assignment)? as f64 / self.data.sample_size() as f64)
    }

    /// The empirical mutual information among the given variables, in nats.
    ///
    /// For every joint assignment of 0s and 1s to the variables, this compares the observed joint
    /// probability `p` against `q`, the product of the individual marginals, and sums
    /// `p * ln(p / q)`. Terms where either `p` or `q` is exactly zero contribute nothing. With two
    /// variables this is the usual plug-in estimate of mutual information; with more, it's the
    /// total correlation.
    ///
    /// The order in which variables are listed doesn't affect the result at all, not even in the
    /// last bit. Listing a variable twice is allowed and treats it as two perfectly correlated
    /// variables.
    ///
    /// ```
    /// use binary_mi::{Dataset, Estimator};
    ///
    /// let data = Dataset::from_rows(&[[0u8, 0, 1], [1, 1, 1], [0, 0, 0], [1, 1, 0]])?;
    /// let estimator = Estimator::new(&data);
    ///
    /// // Variables 0 and 1 are identical, so they share one full bit.
    /// let shared = estimator.i_hat(&[0, 1])?;
    /// assert!((shared - std::f64::consts::LN_2).abs() < 1e-12);
    /// assert_eq!(estimator.i_hat(&[1, 0])?, shared);
    ///
    /// // Variable 2 is independent of both.
    /// assert_eq!(estimator.i_hat(&[0, 2])?, 0.0);
    /// # Ok::<(), binary_mi::Error>(())
    /// ```
    pub fn i_hat(&self, variables: &[usize]) -> Result<f64, Error> {
        // Sorting makes both the enumeration order and the order of the floating-point sums
        // canonical, which is what makes the result independent of how the caller listed them.
        let mut variables: SmallVec<[usize; 8]> = SmallVec::from_slice(variables);
        variables.sort_unstable();

        for variable in variables.iter() {
            if *variable >= self.marginals.len() {
                return Err(Error::UnknownVariable {
                    variable: *variable,
                    variables: self.marginals.len(),
                });
            }
        }

        // Every state that never occurs has p = 0 and would be skipped anyway, so visiting only
        // the observed states in ascending order is the same sum as enumerating all 2^k of them.
        let cells = self.data.joint_counts(&variables)?;
        let sample_size = self.data.sample_size() as f64;
        let k = variables.len();

        let mut total = 0.0;
        for (state, count) in cells {
            let phat = count as f64 / sample_size;
            let denominator: f64 = variables
                .iter()
                .enumerate()
                .map(|(bit, variable)| {
                    let value = (state >> (k - 1 - bit)) & 1;
                    self.marginals.0[[*variable, value as usize]]
                })
                .product();

            if phat == 0.0 || denominator == 0.0 {
                continue;
            }
            total += phat * (phat / denominator).ln();
        }

        debug!("i_hat({:?}) = {}", variables, total);
        Ok(total)
    }

    /// Runs a [G-test][] of the hypothesis that the given variables are mutually independent.
    ///
    /// [G-test]: https://en.wikipedia.org/wiki/G-test
    ///
    /// The G statistic is `2 * N * i_hat(variables)`, which is asymptotically chi-squared
    /// distributed with `2^k - 1 - k` degrees of freedom when the variables really are
    /// independent. A single variable has no degrees of freedom, and its `alpha` is 1.
    ///
    /// ```
    /// use binary_mi::{Dataset, Estimator};
    ///
    /// let rows: Vec<[u8; 2]> = (0..100).map(|i| [i % 2, i % 2]).collect();
    /// let data = Dataset::from_rows(&rows)?;
    /// let test = Estimator::new(&data).test_independence(&[0, 1])?;
    ///
    /// assert_eq!(test.degrees_of_freedom, 1.0);
    /// assert!(test.alpha < 1e-6);
    /// # Ok::<(), binary_mi::Error>(())
    /// ```
    pub fn test_independence(&self, variables: &[usize]) -> Result<IndependenceTest, Error> {
        let information = self.i_hat(variables)?;
        let k = variables.len() as f64;
        let degrees_of_freedom = k.exp2() - 1.0 - k;

        let alpha = if degrees_of_freedom > 0.0 {
            let g = 2.0 * self.data.sample_size() as f64 * information;
            ChiSquared::new(degrees_of_freedom).map_or(1.0, |chi2| 1.0 - chi2.cdf(g.max(0.0)))
        } else {
            1.0
        };

        Ok(IndependenceTest {
            information,
            degrees_of_freedom,
            alpha,
        })
    }
}
