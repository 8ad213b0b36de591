use binary_mi::{Dataset, Error, Estimator, MarginalTable};
use std::fs;

macro_rules! check_variables {
    ($($name:ident)*) => {
        $(
        #[test]
        fn $name() {
            check(stringify!($name).as_bytes().last().unwrap() - b'0');
        }
        )*
    }
}

check_variables! {
    properties_over_2
    properties_over_3
    properties_over_4
    properties_over_5
}

/// A deterministic, mildly correlated dataset: each variable copies its left neighbor about half
/// the time and is otherwise a fresh pseudo-random bit.
fn sample_data(variables: usize, samples: usize) -> Dataset {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let rows: Vec<Vec<u8>> = (0..samples)
        .map(|_| {
            let mut row = Vec::with_capacity(variables);
            for variable in 0..variables {
                let bits = next();
                let value = if variable > 0 && bits & 2 == 0 {
                    row[variable - 1]
                } else {
                    (bits >> 32) as u8 & 1
                };
                row.push(value);
            }
            row
        })
        .collect();
    Dataset::from_rows(&rows).unwrap()
}

fn check(variables: u8) {
    let variables = usize::from(variables);
    let data = sample_data(variables, 200);
    let estimator = Estimator::new(&data);

    for row in estimator.marginals().as_array().rows() {
        assert!((row[0] + row[1] - 1.0).abs() < 1e-12);
    }

    // Growing an assignment one constraint at a time can only shrink the count.
    for values in 0..1u32 << variables {
        let assignment: Vec<(usize, u8)> = (0..variables)
            .map(|variable| (variable, ((values >> variable) & 1) as u8))
            .collect();
        let mut previous = data.sample_size();
        for len in 1..=variables {
            let count = estimator.count(&assignment[..len]).unwrap();
            assert!(count <= previous);
            previous = count;

            let p = estimator.p_hat(&assignment[..len]).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }

    // Every ordering of the same variables must produce exactly the same score.
    let forward: Vec<usize> = (0..variables).collect();
    let reverse: Vec<usize> = forward.iter().rev().copied().collect();
    let mut rotated = forward.clone();
    rotated.rotate_left(1);
    let expected = estimator.i_hat(&forward).unwrap();
    assert_eq!(estimator.i_hat(&reverse).unwrap(), expected);
    assert_eq!(estimator.i_hat(&rotated).unwrap(), expected);
    assert!(expected > 0.0);

    for a in 0..variables {
        for b in a + 1..variables {
            assert_eq!(
                estimator.i_hat(&[a, b]).unwrap(),
                estimator.i_hat(&[b, a]).unwrap()
            );
        }
    }
}

#[test]
fn neighbors_are_more_dependent_than_strangers() {
    let data = sample_data(3, 2000);
    let estimator = Estimator::new(&data);
    let neighbors = estimator.test_independence(&[0, 1]).unwrap();
    let strangers = estimator.test_independence(&[0, 2]).unwrap();

    assert!(neighbors.information > strangers.information);
    assert!(neighbors.alpha < 1e-6);
}

#[test]
fn save_and_restore() {
    let data = sample_data(6, 100);
    let estimator = Estimator::new(&data);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("marginals.bin");

    fs::write(&path, b"stale contents which should be replaced").unwrap();
    estimator.save(&path).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 6 * 16);

    let restored = Estimator::restore(&data, &path).unwrap();
    let original = estimator.marginals().as_array();
    let copy = restored.marginals().as_array();
    assert_eq!(original.shape(), copy.shape());
    for (a, b) in original.iter().zip(copy.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }

    assert_eq!(
        restored.i_hat(&[0, 1, 2]).unwrap(),
        estimator.i_hat(&[0, 1, 2]).unwrap()
    );
}

#[test]
fn restore_missing_file() {
    let data = sample_data(2, 10);
    let dir = tempfile::tempdir().unwrap();
    let result = Estimator::restore(&data, dir.path().join("absent.bin"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn restore_malformed_file() {
    let data = sample_data(2, 10);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.bin");
    fs::write(&path, [0u8; 20]).unwrap();
    assert!(matches!(
        Estimator::restore(&data, &path),
        Err(Error::MalformedTable(20))
    ));
}

#[test]
fn restore_with_fewer_variables() {
    // A table from some other dataset is trusted at construction, and only fails once a query
    // reaches past its end.
    let data = sample_data(3, 10);
    let estimator = Estimator::with_marginals(&data, MarginalTable::from_rows(&[[0.5, 0.5]; 2]));
    assert!(estimator.i_hat(&[0, 1]).is_ok());
    assert!(matches!(
        estimator.i_hat(&[0, 2]),
        Err(Error::UnknownVariable {
            variable: 2,
            variables: 2
        })
    ));
}

#[test]
fn workers_share_one_estimator() {
    let data = sample_data(4, 300);
    let estimator = Estimator::new(&data);
    let pairs = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

    let parallel: Vec<f64> = std::thread::scope(|scope| {
        let handles: Vec<_> = pairs
            .iter()
            .map(|(a, b)| {
                let worker = estimator.clone();
                scope.spawn(move || worker.i_hat(&[*a, *b]).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for ((a, b), score) in pairs.iter().zip(parallel) {
        assert_eq!(estimator.i_hat(&[*a, *b]).unwrap(), score);
    }
}
