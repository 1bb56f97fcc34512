use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use shared_logging::LogLevel;

/// Offers stay acceptable for five minutes unless configured otherwise.
pub const DEFAULT_OFFER_TTL_SECS: u64 = 300;

/// Longest accepted validity window (one week).
pub const MAX_OFFER_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Runtime settings for the dispatcher and its telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Validity window of a new offer, in seconds.
    pub offer_ttl_secs: u64,
    /// Fixed seed for the tie-break; entropy when absent.
    pub rng_seed: Option<u64>,
    /// JSON-lines log destination.
    pub log_path: Option<PathBuf>,
    /// Minimum level written to `log_path`.
    pub log_level: LogLevel,
    /// Durable telemetry event log.
    pub event_log: Option<PathBuf>,
    /// Capacity of the in-memory change bus.
    pub event_capacity: usize,
    /// Snapshot file backing the store.
    pub store_path: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_ttl_secs: DEFAULT_OFFER_TTL_SECS,
            rng_seed: None,
            log_path: None,
            log_level: LogLevel::Info,
            event_log: None,
            event_capacity: default_event_capacity(),
            store_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchConfigSerde {
    #[serde(default = "default_offer_ttl_secs")]
    offer_ttl_secs: u64,
    #[serde(default)]
    rng_seed: Option<u64>,
    #[serde(default)]
    log_path: Option<PathBuf>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    event_log: Option<PathBuf>,
    #[serde(default = "default_event_capacity")]
    event_capacity: usize,
    #[serde(default)]
    store_path: Option<PathBuf>,
}

const fn default_offer_ttl_secs() -> u64 {
    DEFAULT_OFFER_TTL_SECS
}

const fn default_event_capacity() -> usize {
    256
}

impl DispatchConfig {
    /// Loads configuration from a TOML file. Relative paths resolve against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading dispatch config {}", path.display()))?;
        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_toml(&raw, &base).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses a TOML document, resolving relative paths against `base`.
    pub fn from_toml(raw: &str, base: &Path) -> Result<Self> {
        let document: DispatchConfigSerde = toml::from_str(raw)?;
        if document.offer_ttl_secs == 0 || document.offer_ttl_secs > MAX_OFFER_TTL_SECS {
            bail!("offer_ttl_secs must be within 1..={MAX_OFFER_TTL_SECS}");
        }
        if document.event_capacity == 0 {
            bail!("event_capacity must be positive");
        }
        let log_level = match document.log_level.as_deref() {
            Some(raw) => raw.parse()?,
            None => LogLevel::Info,
        };
        let resolve = |candidate: Option<PathBuf>| {
            candidate.map(|p| if p.is_relative() { base.join(p) } else { p })
        };
        Ok(Self {
            offer_ttl_secs: document.offer_ttl_secs,
            rng_seed: document.rng_seed,
            log_path: resolve(document.log_path),
            log_level,
            event_log: resolve(document.event_log),
            event_capacity: document.event_capacity,
            store_path: resolve(document.store_path),
        })
    }

    /// Offer validity window.
    #[must_use]
    pub fn offer_ttl(&self) -> Duration {
        let secs = self.offer_ttl_secs.min(MAX_OFFER_TTL_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }
}
