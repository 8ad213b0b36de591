use binary_mi::{Dataset, Estimator};
use clap::Parser;
use csv_core::{ReadFieldResult, ReaderBuilder};
use lasso::{Rodeo, RodeoResolver, Spur};
use log::info;
use rayon::prelude::*;
use std::io;
use std::mem;
use std::path::PathBuf;
use std::str;

#[derive(Parser, Debug)]
#[command(name = "binary-mi")]
#[command(about = "Rank pairs of binary variables by empirical mutual information")]
struct Args {
    /// Restore marginals from this file instead of computing them
    #[arg(long, value_name = "FILE")]
    marginals: Option<PathBuf>,

    /// Write the marginal table to this file
    #[arg(long, value_name = "FILE")]
    save_marginals: Option<PathBuf>,

    /// Print at most this many pairs
    #[arg(short, long)]
    top: Option<usize>,

    /// Only print pairs whose independence alpha is at most this value
    #[arg(short, long, default_value_t = 1.0)]
    alpha: f64,

    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,
}

/// Reads a tab-separated matrix: a header of variable names, then one row of 0s and 1s per sample.
fn load_data<I: io::Read>(mut input: I) -> io::Result<(RodeoResolver<Spur>, Vec<Spur>, Dataset)> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 1024];
    let mut fieldlen = 0;
    let mut names = Vec::new();
    let mut in_header = true;
    let mut record = Vec::new();
    let mut rows: Vec<Vec<u8>> = Vec::new();
    let mut rodeo = Rodeo::new();
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').build();

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = tsv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("field too long on line {}", tsv.line()),
                    ));
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen])
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    fieldlen = 0;

                    if in_header {
                        if rodeo.get(field).is_some() {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("duplicate variable name {:?}", field),
                            ));
                        }
                        names.push(rodeo.get_or_intern(field));
                    } else {
                        let value = match field.trim() {
                            "0" => 0,
                            "1" => 1,
                            _ => {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!(
                                        "expected 0 or 1 on line {}, found {:?}",
                                        tsv.line(),
                                        field
                                    ),
                                ));
                            }
                        };
                        record.push(value);
                    }

                    if record_end {
                        if in_header {
                            in_header = false;
                        } else {
                            rows.push(mem::take(&mut record));
                        }
                    }
                }
                ReadFieldResult::End => {
                    let data = Dataset::from_rows(&rows)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    if data.sample_size() > 0 && data.variable_count() != names.len() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "header names {} variables but rows have {}",
                                names.len(),
                                data.variable_count()
                            ),
                        ));
                    }
                    return Ok((rodeo.into_resolver(), names, data));
                }
            }
        }
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    simplelog::TermLogger::init(
        if args.verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let (resolver, names, data) = load_data(io::stdin().lock())?;
    info!(
        "Loaded {} samples of {} variables",
        data.sample_size(),
        data.variable_count()
    );

    let estimator = match &args.marginals {
        Some(path) => Estimator::restore(&data, path)?,
        None => Estimator::new(&data),
    };
    if let Some(path) = &args.save_marginals {
        estimator.save(path)?;
    }

    let variables = data.variable_count();
    let pairs: Vec<(usize, usize)> = (0..variables)
        .flat_map(|a| (a + 1..variables).map(move |b| (a, b)))
        .collect();
    info!("Scoring {} pairs...", pairs.len());

    let mut scores = pairs
        .into_par_iter()
        .map(|(a, b)| {
            estimator
                .test_independence(&[a, b])
                .map(|test| (a, b, test))
        })
        .collect::<Result<Vec<_>, binary_mi::Error>>()?;
    scores.sort_by(|(_, _, x), (_, _, y)| y.information.total_cmp(&x.information));

    let limit = args.top.unwrap_or(scores.len());
    for (a, b, test) in scores
        .iter()
        .filter(|(_, _, test)| test.alpha <= args.alpha)
        .take(limit)
    {
        println!(
            "{}\t{}\t{:.6}\t{:.4}",
            resolver.resolve(&names[*a]),
            resolver.resolve(&names[*b]),
            test.information,
            test.alpha
        );
    }

    Ok(())
}
