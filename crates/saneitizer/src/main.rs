//! saneitize binary entry point.

use anyhow::Result;
use clap::Parser;
use saneitizer::{Cli, Commands, commands};
use saneitizer_core::logging::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_loaded) = cli.load_config()?;
    init_logging(&config.log)?;

    match cli.command {
        Commands::Check(args) => commands::check::execute(&args, &config, config_loaded, cli.format),
        Commands::Chunks(args) => commands::chunks::execute(&args, cli.format),
    }
}
