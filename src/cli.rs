use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sbjit",
    about = "Compiles a script's block IR (JSON) to a JavaScript factory source."
)]
pub struct Args {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        help = "Disable the nullish-coalescing list optimization for older evaluators."
    )]
    pub no_nullish: bool,

    #[arg(long, help = "Log each compiled factory source at debug level.")]
    pub debug_emit: bool,
}
