use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "village-chat", about = "Neighbourhood chat sync engine on a simulated backend")]
pub struct Cli {
    /// Path to config file (default: ./config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a scripted two-user conversation and print what each side sees
    Demo,
    /// Chat interactively as one user with another
    Chat {
        /// Username to sign in as
        #[arg(long = "as")]
        user: String,
        /// Username of the other participant
        #[arg(long = "with")]
        peer: String,
    },
}

impl Cli {
    pub fn command_or_default(&self) -> Command {
        self.command.clone().unwrap_or(Command::Demo)
    }
}
