//! CLI entry and dispatch.

use anyhow::Result;
use clap::Parser;

mod commands;

#[derive(Parser)]
#[command(name = "sigloop")]
#[command(version = "0.1")]
#[command(about = "Nested signal loop demo")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the interactive hub (default)
    Hub {
        /// Queue overlapping input requests instead of rejecting them
        #[arg(long)]
        allow_concurrent_input: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // default to the hub
    let Some(command) = cli.command else {
        return commands::hub::run(false);
    };

    match command {
        Commands::Hub {
            allow_concurrent_input,
        } => commands::hub::run(allow_concurrent_input),

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
