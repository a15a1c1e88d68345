//! xspool CLI
//!
//! Command-line tools for inspecting and maintaining spool scratch space.
//!
//! # Commands
//!
//! - `sweep` - Reclaim scratch directories left by dead processes
//! - `varint` - Encode or decode VLQ / zig-zag integers
//! - `spool` - Run a payload through a content buffer and replay cache
//! - `config` - Print the effective configuration

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::varint::Width;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// xspool command-line tools.
#[derive(Parser)]
#[command(name = "xspool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (.json or key=value properties)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Configuration override, repeatable (key=value)
    #[arg(global = true, short = 'D', long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct VarintFlags {
    /// Apply zig-zag before VLQ
    #[arg(short, long)]
    zigzag: bool,

    /// Treat values as 64-bit
    #[arg(short, long)]
    long: bool,
}

impl VarintFlags {
    fn width(&self) -> Width {
        if self.long {
            Width::Long
        } else {
            Width::Int
        }
    }
}

#[derive(Subcommand)]
enum VarintCommand {
    /// Encode decimal values
    Encode {
        /// Values to encode
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i64>,

        #[command(flatten)]
        flags: VarintFlags,
    },

    /// Decode packed hex bytes
    Decode {
        /// Hex input, whitespace allowed
        hex: String,

        #[command(flatten)]
        flags: VarintFlags,
    },
}

#[derive(Subcommand)]
enum Commands {
    /// Reclaim orphaned scratch directories under a root
    Sweep {
        /// Scratch root (defaults to the configured temp.root)
        root: Option<PathBuf>,
    },

    /// Encode or decode compact integers
    Varint {
        #[command(subcommand)]
        command: VarintCommand,
    },

    /// Spool a synthetic payload and report what happened
    Spool {
        /// Payload size in bytes
        #[arg(short, long, default_value = "1048576")]
        bytes: u64,

        /// Write size in bytes
        #[arg(long, default_value = "8192")]
        chunk: usize,

        /// Skip the replay cache part
        #[arg(long)]
        no_replay: bool,
    },

    /// Print the effective configuration
    Config,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = commands::config::resolve(cli.config.as_deref(), &cli.overrides)?;

    match cli.command {
        Commands::Sweep { root } => {
            let root = root.unwrap_or_else(|| config.resolved_temp_root());
            commands::sweep::run(&root, &cli.format)?;
        }
        Commands::Varint { command } => match command {
            VarintCommand::Encode { values, flags } => {
                commands::varint::run_encode(&values, flags.width(), flags.zigzag, &cli.format)?;
            }
            VarintCommand::Decode { hex, flags } => {
                commands::varint::run_decode(&hex, flags.width(), flags.zigzag, &cli.format)?;
            }
        },
        Commands::Spool {
            bytes,
            chunk,
            no_replay,
        } => {
            let args = commands::spool::SpoolArgs {
                bytes,
                chunk,
                replay: !no_replay,
            };
            commands::spool::run(config, &args, &cli.format)?;
        }
        Commands::Config => {
            commands::config::run(&config, &cli.format)?;
        }
        Commands::Version => {
            println!("xspool CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("xspool Core v{}", xspool_core::VERSION);
        }
    }

    Ok(())
}
