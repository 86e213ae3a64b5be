mod cli;
mod cli_utils;
mod commands;
mod merger;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Dispatch to appropriate command handler; each one initializes logging
    // once its effective log level is known
    match cli.command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::Targets => {
            confgraph::logging::init("warn");
            commands::targets::run()
        }
        Commands::Cache(args) => commands::cache::cache(&args),
    }
}
