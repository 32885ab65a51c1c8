//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the kernel protocol on the ports of a connection file
    Run {
        /// Jupyter connection file
        #[arg(long, value_name = "PATH")]
        connection_file: PathBuf,

        /// Interpreter used to run cells
        #[arg(long, value_name = "BINARY", default_value = "sh")]
        shell: String,

        /// Working directory for cells
        #[arg(long, value_name = "PATH")]
        working_dir: Option<PathBuf>,

        /// Return from `run` on shutdown instead of exiting the process
        #[arg(long)]
        embedded: bool,
    },

    /// Check that a running kernel answers on heartbeat and shell
    Probe {
        /// Jupyter connection file of the running kernel
        #[arg(long, value_name = "PATH")]
        connection_file: PathBuf,

        /// Seconds to wait for each answer
        #[arg(long, value_name = "SECONDS", default_value = "10")]
        timeout: u64,
    },

    /// Write a connection file with free ports and a random key
    ConnectionFile {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Address to bind
        #[arg(long, value_name = "IP", default_value = "127.0.0.1")]
        ip: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Connection file to merge in
        #[arg(long, value_name = "PATH")]
        connection_file: PathBuf,

        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}
