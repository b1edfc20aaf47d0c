//! Command-line interface.

use crate::browsers::{BrowserConfig, BrowserModule, Chrome, Firefox};
use crate::config::MarkdexConfig;
use crate::daemon::Daemon;
use crate::error::SetupError;
use crate::logging;
use crate::store::AppContext;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Markdex - browser bookmark aggregation
#[derive(Parser)]
#[command(name = "markdex")]
#[command(about = "Aggregates browser bookmarks into a tag-indexed local database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse every enabled browser source once, sync, and exit
    Load,
    /// Run continuously, re-syncing when a source changes
    Daemon,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => MarkdexConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MarkdexConfig::load()?,
    };

    // CLI flags override config and environment.
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    if let Some(output) = &cli.log_output {
        config.logging.output = output.clone();
    }
    if let Some(file) = &cli.log_file {
        config.logging.file = Some(file.clone());
    }
    logging::init_logging(Some(&config.logging))?;

    let ctx = AppContext::initialize(&config.database.data_dir)
        .context("initializing bookmark store")?;
    let modules = build_modules(&config)?;
    if modules.is_empty() {
        bail!("no browser sources enabled or resolvable");
    }

    match cli.command {
        Commands::Load => {
            for mut module in modules {
                let name = module.name();
                let Some(loader) = module.as_loader() else {
                    continue;
                };
                match loader.load(&ctx) {
                    Ok(()) => info!(module = name, "loaded"),
                    Err(e) => error!(module = name, error = %e, "load failed"),
                }
            }
            info!(db = %ctx.disk_path().display(), "load complete");
        }
        Commands::Daemon => {
            let mut daemon = Daemon::new(ctx);
            for module in modules {
                daemon.spawn(module);
            }
            info!("daemon started");
            daemon.join();
        }
    }

    Ok(())
}

/// Instantiate every enabled browser module. A module that fails to
/// construct is skipped; the others still run.
fn build_modules(config: &MarkdexConfig) -> Result<Vec<Box<dyn BrowserModule>>, SetupError> {
    let mut modules: Vec<Box<dyn BrowserModule>> = Vec::new();
    let debounce = config.watch.debounce();

    if config.chrome.enabled {
        match config.chrome.resolved_path() {
            Some(path) => {
                let chrome = Chrome::new(BrowserConfig {
                    name: "chrome",
                    bookmarks_path: path,
                    use_hooks: config.chrome.hooks.clone(),
                    debounce,
                })?;
                modules.push(Box::new(chrome));
            }
            None => warn!("chrome enabled but no bookmarks path could be resolved"),
        }
    }

    if config.firefox.enabled {
        let Some(path) = config.firefox.places_file.clone() else {
            return Err(SetupError::Config(
                "firefox enabled but firefox.places_file is not set".to_string(),
            ));
        };
        match Firefox::new(
            BrowserConfig {
                name: "firefox",
                bookmarks_path: path,
                use_hooks: config.firefox.hooks.clone(),
                debounce,
            },
            config.firefox.schema.to_schema(),
        ) {
            Ok(firefox) => modules.push(Box::new(firefox)),
            Err(e) => warn!(error = %e, "firefox module skipped"),
        }
    }

    Ok(modules)
}
