//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::bootstrap::ProjectOptions;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "bootdoc";
const ENV_PREFIX: &str = "BOOTDOC";
const DEFAULT_REVISIONS_DIR: &str = "revisions";

/// Command-line arguments for the bootdoc binary.
#[derive(Debug, Parser)]
#[command(
    name = "bootdoc",
    version,
    about = "Render cached bootstrap documents by project and revision"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BOOTDOC_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render one bootstrap document to stdout.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Revision to render; the active revision when omitted.
    #[arg(long, value_name = "REVISION")]
    pub revision: Option<String>,

    /// Template data as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the project identifier.
    #[arg(long = "project", value_name = "PROJECT")]
    pub project: Option<String>,

    /// Override the deployment environment.
    #[arg(long = "env", value_name = "ENV")]
    pub env: Option<String>,

    /// Override the application version used in the subscription name.
    #[arg(long = "app-version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Override the per-instance subscription postfix.
    #[arg(long = "subscription-postfix", value_name = "POSTFIX")]
    pub subscription_postfix: Option<String>,

    /// Override the revision fetch timeout.
    #[arg(long = "fetch-timeout-ms", value_name = "MILLISECONDS")]
    pub fetch_timeout_ms: Option<u64>,

    /// Override the directory holding revision templates.
    #[arg(long = "revisions-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub revisions_dir: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub project: ProjectOptions,
    pub revisions: RevisionSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RevisionSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Render(args)) => raw.apply_render_overrides(&args.overrides),
        None => raw.apply_render_overrides(&RenderOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    project: ProjectOptions,
    revisions: RawRevisionSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRevisionSettings {
    directory: Option<PathBuf>,
}

impl RawSettings {
    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(project) = overrides.project.as_ref() {
            self.project.project = Some(project.clone());
        }
        if let Some(env) = overrides.env.as_ref() {
            self.project.env = Some(env.clone());
        }
        if let Some(version) = overrides.version.as_ref() {
            self.project.version = Some(version.clone());
        }
        if let Some(postfix) = overrides.subscription_postfix.as_ref() {
            self.project.subscription_postfix = Some(postfix.clone());
        }
        if let Some(timeout) = overrides.fetch_timeout_ms {
            self.project.fetch_timeout_ms = Some(timeout);
        }
        if let Some(dir) = overrides.revisions_dir.as_ref() {
            self.revisions.directory = Some(dir.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            project,
            revisions,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let revisions = build_revision_settings(revisions)?;

        if project.fetch_timeout_ms == Some(0) {
            return Err(LoadError::invalid(
                "project.fetch_timeout_ms",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            logging,
            project,
            revisions,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_revision_settings(revisions: RawRevisionSettings) -> Result<RevisionSettings, LoadError> {
    let directory = revisions
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REVISIONS_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "revisions.directory",
            "must not be empty",
        ));
    }
    Ok(RevisionSettings { directory })
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
