//! Convert a deployment directory to CSV.
//!
//! Reads `RunIndex.csv`, every scan and orientation file it lists and the
//! `config.json` snapshot, and writes `RunData.csv`: one row per ping with
//! the amplitudes as trailing columns.
//!
//! # Usage
//!
//! ```bash
//! sonar-convert data/deployment_01
//! sonar-convert data/deployment_01 --output /tmp/run.csv
//! ```

use std::path::PathBuf;

use clap::Parser;

use meltstake_sonar::export::{convert_run, default_output};

#[derive(Parser)]
#[command(name = "sonar-convert")]
#[command(about = "Convert 881A scan files of a deployment to RunData.csv")]
struct Args {
    /// Deployment directory
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Run index file name inside the directory
    #[arg(long, default_value = "RunIndex.csv")]
    index: String,

    /// Output CSV (default: <dir>/RunData.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.dir));

    println!("Deployment: {}", args.dir.display());
    println!("Output:     {}", output.display());

    let summary = convert_run(&args.dir, &args.index, &output)?;

    println!();
    println!("Files converted: {}", summary.files);
    println!("Rows written:    {}", summary.rows);
    if summary.skipped > 0 {
        println!("Entries skipped: {}", summary.skipped);
    }
    if summary.damaged > 0 {
        println!("Damaged files:   {}", summary.damaged);
    }
    Ok(())
}
