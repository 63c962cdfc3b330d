use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::caching::CacheError;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: std::env::var("STATSD_SERVER").ok(),
            prefix: "memocache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Configuration of a single [`Cache`](crate::Cache) instance.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one file per cached key. Created on first use.
    pub path: PathBuf,

    /// Time-to-live of entries which do not request their own.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Upper bound for [`default_ttl`](Self::default_ttl) and for per-request TTLs.
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,

    /// Whether produced and loaded values are also kept in process memory.
    pub keep_in_memory: bool,

    /// Default file suffix of cache files, without the leading dot.
    pub extension: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".cache"),
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(3600 * 24 * 7),
            keep_in_memory: true,
            extension: "tmp".into(),
        }
    }
}

impl CacheConfig {
    /// Checks the TTL bounds: `0 < default_ttl <= max_ttl`.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::Configuration(
                "default ttl must be greater than zero".into(),
            ));
        }
        if self.default_ttl > self.max_ttl {
            return Err(CacheError::Configuration(
                "default ttl cannot be greater than the max ttl".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the TTL of a single request against the configured bounds.
    pub fn effective_ttl(&self, ttl: Option<Duration>) -> Result<Duration, CacheError> {
        let Some(ttl) = ttl else {
            return Ok(self.default_ttl);
        };
        if ttl.is_zero() {
            return Err(CacheError::Configuration(
                "ttl must be greater than zero".into(),
            ));
        }
        if ttl > self.max_ttl {
            return Err(CacheError::Configuration(format!(
                "ttl of {ttl:?} exceeds the max ttl of {:?}",
                self.max_ttl
            )));
        }
        Ok(ttl)
    }
}

/// Top-level configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The cache itself.
    pub cache: CacheConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Self =
            serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        config
            .cache
            .validate()
            .context("invalid cache configuration")?;
        Ok(config)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
