// CLI modules
mod cli;

use clap::{Parser, Subcommand};
use cli::{
    args::Args, op::Op, Create, Daemon, Export, Import, Init, List, Lookup, Popularity, Results,
    Show, Subscribe, Version,
};

command_enum! {
    (Init, Init),
    (Create, Create),
    (List, List),
    (Show, Show),
    (Subscribe, Subscribe),
    (Results, Results),
    (Export, Export),
    (Import, Import),
    (Lookup, Lookup),
    (Popularity, Popularity),
    (Daemon, Daemon),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let ctx = cli::op::OpContext::new(args.config_path);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
