//! Runtime configuration read from `LOON_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatcher::DispatcherConfig;
use crate::extract::{ArchiveExtractor, DEFAULT_NOISE_FRAGMENTS, ExtractLimits};
use crate::transport::ServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub workers: usize,
    pub storage_root: PathBuf,
    /// Path sources must resolve below this directory.
    pub upload_root: PathBuf,
    pub noise_fragments: Vec<String>,
    pub limits: ExtractLimits,
    pub slow_task_warning: Duration,
    pub metadata_delimiter: u8,
    pub metadata_skip_rows: usize,
    /// Deployment label reported by the health check.
    pub build: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            storage_root: PathBuf::from("./storage"),
            upload_root: PathBuf::from("./uploads"),
            noise_fragments: DEFAULT_NOISE_FRAGMENTS.iter().map(|s| s.to_string()).collect(),
            limits: ExtractLimits::default(),
            slow_task_warning: Duration::from_secs(300),
            metadata_delimiter: b',',
            metadata_skip_rows: 1,
            build: None,
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn delimiter(
    lookup: &impl Fn(&str) -> Option<String>,
    default: u8,
) -> Result<u8, ConfigError> {
    let Some(value) = lookup("LOON_METADATA_DELIMITER") else {
        return Ok(default);
    };
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        b"\\t" => Ok(b'\t'),
        _ => Err(ConfigError::Invalid {
            name: "LOON_METADATA_DELIMITER",
            value,
            reason: "expected a single ASCII character".to_string(),
        }),
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup` onto the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let workers: usize = parsed(&lookup, "LOON_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                name: "LOON_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        let noise_fragments = match lookup("LOON_NOISE_FRAGMENTS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.noise_fragments,
        };

        let limits = ExtractLimits {
            max_entries: parsed(&lookup, "LOON_MAX_ENTRIES", defaults.limits.max_entries)?,
            max_entry_bytes: parsed(
                &lookup,
                "LOON_MAX_ENTRY_BYTES",
                defaults.limits.max_entry_bytes,
            )?,
            max_total_bytes: parsed(
                &lookup,
                "LOON_MAX_TOTAL_BYTES",
                defaults.limits.max_total_bytes,
            )?,
        };

        Ok(Self {
            workers,
            storage_root: lookup("LOON_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            upload_root: lookup("LOON_UPLOAD_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_root),
            noise_fragments,
            limits,
            slow_task_warning: Duration::from_secs(parsed(
                &lookup,
                "LOON_SLOW_TASK_SECS",
                defaults.slow_task_warning.as_secs(),
            )?),
            metadata_delimiter: delimiter(&lookup, defaults.metadata_delimiter)?,
            metadata_skip_rows: parsed(
                &lookup,
                "LOON_METADATA_SKIP_ROWS",
                defaults.metadata_skip_rows,
            )?,
            build: lookup("LOON_BUILD").filter(|b| !b.is_empty()),
            host: lookup("LOON_HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "LOON_PORT", defaults.port)?,
        })
    }

    pub fn extractor(&self) -> ArchiveExtractor {
        ArchiveExtractor::new(self.noise_fragments.clone(), self.limits)
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers,
            slow_task_warning: self.slow_task_warning,
        }
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }
}
