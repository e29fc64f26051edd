use anyhow::Result;
use clap::Parser;
use sbjit::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    sbjit::run_cli(&args)
}
