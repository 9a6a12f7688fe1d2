// Command line utility for running the manifold-alignment integration on a dataset directory

use anyhow::{Context, Error};
use clap::{value_parser, Arg, Command};
use env_logger::{Env, Target};
use flate2::write::GzEncoder;
use flate2::Compression;
use integrate::io::load;
use integrate::run_manifold_alignment;
use log::info;
use ndarray::prelude::*;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .init();

    let matches = Command::new("integrate-cmd")
        .arg(
            Arg::new("INPUT")
                .help("dataset directory with matrix.mtx.gz and obs.csv, or an .h5ad file")
                .index(1)
                .default_value("testing")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("BATCH")
                .help("obs column holding the batch label")
                .short('b')
                .long("batch")
                .default_value("method"),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("also write the embedding and corrected matrix here as gzipped CSV")
                .short('o')
                .long("out_dir")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let input: &PathBuf = matches.get_one("INPUT").context("missing INPUT")?;
    let batch: &String = matches.get_one("BATCH").context("missing BATCH")?;
    let adata = load(input)?;

    let (emb, corrected) = run_manifold_alignment(&adata, batch)?;
    println!("{emb}");
    println!("{corrected}");
    println!("{}", corrected.x);

    if let Some(out_dir) = matches.get_one::<PathBuf>("OUT_DIR") {
        create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
        array_to_csv(&emb, out_dir.join("embedding.csv.gz"))?;
        array_to_csv(&corrected.x, out_dir.join("corrected.csv.gz"))?;
        info!("wrote results to {}", out_dir.display());
    }

    Ok(())
}

pub fn array_to_csv(array: &Array2<f64>, path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
    let num_cols = array.shape()[1];
    for row in array.axis_iter(Axis(0)) {
        for (i, entry) in row.iter().enumerate() {
            write!(writer, "{}", *entry)?;
            if i + 1 < num_cols {
                write!(writer, ",")?;
            }
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}
