use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use astraeus::data::{concat, ConcatOptions, Selection};
use astraeus::io::table::{to_record_batch, write_parquet};
use astraeus::io::{
    is_container, list_h5, normalize_xr_path, try_read_h5, try_read_xr, try_write_xr, Data, WriteOptions,
};

#[derive(Parser)]
#[command(name = "astraeus", version, about = "Inspect and combine labeled-array files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a summary of a file.
    Inspect {
        path: PathBuf,
        /// Dump every dataset as a table instead of the decoded summary.
        #[arg(long)]
        raw: bool,
        /// Print the attributes of a container as JSON.
        #[arg(long, conflicts_with = "raw")]
        json: bool,
    },
    /// List every stored dataset key.
    Keys { path: PathBuf },
    /// Copy every dataset of a file into a Parquet file.
    Export {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 4)]
        level: u32,
    },
    /// Concatenate container files along a dimension.
    Concat {
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value = "time")]
        dim: String,
        /// Also concatenate data variables that lack the dimension.
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Inspect { path, raw, json } => inspect(path, raw, json),
        Command::Keys { path } => {
            let path = normalize_xr_path(path);
            for key in list_h5(&path).with_context(|| format!("opening {}", path.display()))? {
                println!("{key}");
            }
            Ok(())
        }
        Command::Export { input, output, level } => {
            let data = load_all(input)?;
            write_parquet(&output, &data, level)?;
            log::info!("Exported {} dataset(s) to {}", data.len(), output.display());
            println!("{}", output.display());
            Ok(())
        }
        Command::Concat {
            output,
            inputs,
            dim,
            all,
        } => {
            let datasets = inputs
                .iter()
                .map(|p| try_read_xr(p).with_context(|| format!("reading {}", p.display())))
                .collect::<Result<Vec<_>>>()?;
            let options = ConcatOptions {
                data_vars: if all { Selection::All } else { Selection::Minimal },
                ..ConcatOptions::along(&dim)
            };
            let joined = concat(&datasets, &options).context("concatenating")?;
            let written = try_write_xr(&output, &joined, &WriteOptions::default())?;
            log::info!("Concatenated {} file(s) into {}", datasets.len(), written.display());
            println!("{}", written.display());
            Ok(())
        }
    }
}

fn load_all(path: PathBuf) -> Result<Data> {
    let path = normalize_xr_path(path);
    let mut data = Data::new();
    try_read_h5(&path, &mut data, None).with_context(|| format!("reading {}", path.display()))?;
    Ok(data)
}

fn inspect(path: PathBuf, raw: bool, json: bool) -> Result<()> {
    let path = normalize_xr_path(path);

    if raw {
        let batch = to_record_batch(&load_all(path)?)?;
        let table = arrow::util::pretty::pretty_format_batches(&[batch]).context("formatting columns")?;
        println!("{table}");
    } else if is_container(&path).with_context(|| format!("opening {}", path.display()))? {
        let ds = try_read_xr(&path)?;
        if json {
            let mut attrs = BTreeMap::new();
            attrs.insert("/".to_string(), &ds.attrs);
            for (name, var) in ds.coords().iter().chain(ds.data_vars()) {
                attrs.insert(name.clone(), var.attrs());
            }
            println!("{}", serde_json::to_string_pretty(&attrs).context("encoding attributes")?);
        } else {
            print!("{ds}");
        }
    } else {
        for (key, values) in load_all(path)?.iter() {
            println!("{key:<24} {} {:?}", values.dtype(), values.shape());
        }
    }
    Ok(())
}
