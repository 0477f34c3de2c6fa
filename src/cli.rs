//! Command-line interface for Shipwright
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::shipyard::{EditorPackage, PhpPackage};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Shipwright - FreeBSD jail provisioning
#[derive(Parser)]
#[command(name = "shipwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "shipwright.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Provision a new jail
    Create {
        /// Jail name
        name: String,

        /// Editor package to install
        #[arg(long, value_enum)]
        editor: Option<EditorPackage>,

        /// PHP release to install
        #[arg(long, value_enum)]
        php: Option<PhpPackage>,

        /// Install the Apache web server
        #[arg(long)]
        web_server: bool,

        /// Open a console in the jail once it is ready
        #[arg(long)]
        enter: bool,
    },

    /// List registered jails
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check that the host is set up for provisioning
    Check,

    /// Open an interactive console in a running jail
    Console {
        /// Jail name
        jail: String,

        /// User to run as
        #[arg(short, long, default_value = "root")]
        user: String,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "shipwright", &mut std::io::stdout());
    }
}
