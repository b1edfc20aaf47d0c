//! Structured logging built on `tracing`.
//!
//! Configurable level, format and destination. Environment variables win
//! over the config file: `MARKDEX_LOG` (filter directives),
//! `MARKDEX_LOG_FORMAT`, `MARKDEX_LOG_OUTPUT`, `MARKDEX_LOG_FILE`.

use crate::error::SetupError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// json or text
    #[serde(default = "default_format")]
    pub format: String,

    /// stderr, stdout, file, file+stderr
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output includes file; None means the platform
    /// state directory.
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module filter directives, e.g. `markdex::store = debug`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

/// Resolve the log file path: `MARKDEX_LOG_FILE`, then the config file
/// setting, then the platform state directory.
pub fn resolve_log_file_path(config_file: Option<PathBuf>) -> Result<PathBuf, SetupError> {
    if let Ok(env_path) = std::env::var("MARKDEX_LOG_FILE") {
        if !env_path.is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }
    if let Some(p) = config_file {
        if !p.as_os_str().is_empty() {
            return Ok(p);
        }
    }
    let dirs = directories::ProjectDirs::from("", "markdex", "markdex").ok_or_else(|| {
        SetupError::Config("could not determine platform state directory for log file".to_string())
    })?;
    let state_dir = dirs
        .state_dir()
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs.data_dir().to_path_buf());
    Ok(state_dir.join("markdex.log"))
}

/// Initialize the global subscriber. Environment variables take precedence
/// over `config`.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), SetupError> {
    let disabled = config.map(|c| !c.enabled).unwrap_or(false);
    if disabled {
        Registry::default()
            .with(EnvFilter::new("off"))
            .with(fmt::layer().with_writer(std::io::sink))
            .init();
        return Ok(());
    }

    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true);

    let open_log_file = || -> Result<std::fs::File, SetupError> {
        let path = resolve_log_file_path(config.and_then(|c| c.file.clone()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SetupError::Config(format!("failed to create log directory: {e}"))
            })?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SetupError::Config(format!("failed to open log file {path:?}: {e}")))
    };

    let base = Registry::default().with(filter);

    macro_rules! init_json {
        ($writer:expr) => {
            base.with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer($writer),
            )
            .init()
        };
    }
    macro_rules! init_text {
        ($writer:expr, $ansi:expr) => {
            base.with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi($ansi)
                    .with_writer($writer),
            )
            .init()
        };
    }

    match (format.as_str(), output) {
        ("json", Output::Stderr) => init_json!(std::io::stderr),
        ("json", Output::Stdout) => init_json!(std::io::stdout),
        ("json", Output::File) => init_json!(open_log_file()?),
        ("json", Output::FileAndStderr) => {
            init_json!(open_log_file()?.and(std::io::stderr))
        }
        (_, Output::Stderr) => init_text!(std::io::stderr, use_color),
        (_, Output::Stdout) => init_text!(std::io::stdout, use_color),
        (_, Output::File) => init_text!(open_log_file()?, false),
        (_, Output::FileAndStderr) => {
            init_text!(open_log_file()?.and(std::io::stderr), false)
        }
    }

    Ok(())
}

fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, SetupError> {
    if let Ok(filter) = EnvFilter::try_from_env("MARKDEX_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(level);
    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{module}={module_level}");
            filter = filter.add_directive(directive.parse().map_err(|e| {
                SetupError::Config(format!("invalid log directive {directive:?}: {e}"))
            })?);
        }
    }
    Ok(filter)
}

fn determine_format(config: Option<&LoggingConfig>) -> Result<String, SetupError> {
    if let Ok(format) = std::env::var("MARKDEX_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }
    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(SetupError::Config(format!(
            "invalid log format: {format} (must be 'json' or 'text')"
        )));
    }
    Ok(format.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Stdout,
    Stderr,
    File,
    FileAndStderr,
}

fn determine_output(config: Option<&LoggingConfig>) -> Result<Output, SetupError> {
    let output = match std::env::var("MARKDEX_LOG_OUTPUT") {
        Ok(v) => v,
        Err(_) => config
            .map(|c| c.output.clone())
            .unwrap_or_else(default_output),
    };
    match output.as_str() {
        "stdout" => Ok(Output::Stdout),
        "stderr" => Ok(Output::Stderr),
        "file" => Ok(Output::File),
        "file+stderr" => Ok(Output::FileAndStderr),
        _ => Err(SetupError::Config(format!(
            "invalid log output: {output} (must be 'stdout', 'stderr', 'file', or 'file+stderr')"
        ))),
    }
}
