//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use memocache::Config;
use memocache::metrics;

use crate::commands;
use crate::logging;

/// Memocache commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Remove all cache files, regardless of their age.
    Clean(ExtensionArgs),

    /// Remove cache files which outlived the default ttl.
    Purge(ExtensionArgs),

    /// Remove a single entry.
    Remove {
        /// The key of the entry.
        key: String,

        #[command(flatten)]
        extension: ExtensionArgs,
    },

    /// Print the output of a program, running it only if no fresh output is cached.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct ExtensionArgs {
    /// The file extension of cache files, instead of the configured one.
    #[arg(long, value_name = "EXT")]
    pub extension: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// The key to store the output under.
    pub key: String,

    /// How long the output stays fresh, for example `10m` or `2h`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ttl: Option<Duration>,

    #[command(flatten)]
    pub extension: ExtensionArgs,

    /// Always run the program, without reading or writing the cache.
    #[arg(long)]
    pub skip: bool,

    /// The program to run.
    #[arg(required = true, last = true, value_name = "PROGRAM")]
    pub program: Vec<String>,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(name = "memocache", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime has not been started yet, so this is still single-threaded.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(commands::execute(cli.command, config))
}
