pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "subs")]
#[command(about = "Signed, gossiped subscriptions to saved searches")]
pub struct Args {
    /// Path to the subs state directory (defaults to ~/.subs)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
