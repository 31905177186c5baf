//! Root scheduler configuration.

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::pool::WorkerPoolConfig;
use crate::core::error::AppResult;
use crate::core::scheduler::SchedulerLimits;

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "SCHEDULER_CONFIG";

/// Task store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// Records live in process memory and are lost on exit.
    #[default]
    InMemory,
    /// Append-only JSON lines log under `path`.
    File {
        /// Directory holding `tasks.jsonl`.
        path: PathBuf,
    },
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool settings.
    pub pool: WorkerPoolConfig,
    /// Queue depth at which submissions are rejected.
    pub max_queue_depth: usize,
    /// Highest accepted priority.
    pub max_priority: u8,
    /// Largest accepted payload in serialized bytes.
    pub max_payload_bytes: usize,
    /// Longest accepted start delay.
    pub max_delay_ms: u64,
    /// Page size used when a list request gives none.
    pub default_page_size: usize,
    /// Largest accepted page size.
    pub max_page_size: usize,
    /// Grace before a cancel-requested running task is cancelled
    /// administratively. Unset means cancellation is advisory only.
    pub cancel_grace_ms: Option<u64>,
    /// Re-reads allowed when a cancel races another transition.
    pub max_conflict_retries: u32,
    /// Task store backend.
    pub store: StoreBackendConfig,
    /// Events kept by the in-memory audit sink; 0 disables it.
    pub audit_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let limits = SchedulerLimits::default();
        Self {
            pool: WorkerPoolConfig::default(),
            max_queue_depth: 10_000,
            max_priority: limits.max_priority,
            max_payload_bytes: limits.max_payload_bytes,
            max_delay_ms: limits.max_delay_ms,
            default_page_size: limits.default_page_size,
            max_page_size: limits.max_page_size,
            cancel_grace_ms: None,
            max_conflict_retries: limits.max_conflict_retries,
            store: StoreBackendConfig::InMemory,
            audit_capacity: 0,
        }
    }
}

impl SchedulerConfig {
    /// Validate all values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.max_payload_bytes == 0 {
            return Err("max_payload_bytes must be greater than 0".into());
        }
        if self.max_page_size == 0 {
            return Err("max_page_size must be greater than 0".into());
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err("default_page_size must be between 1 and max_page_size".into());
        }
        if self.cancel_grace_ms == Some(0) {
            return Err("cancel_grace_ms must be greater than 0 when set".into());
        }
        if let StoreBackendConfig::File { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err("store.path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment.
    ///
    /// A `.env` file is loaded first if present. `SCHEDULER_CONFIG` may name
    /// a JSON file used as the base; individual `SCHEDULER_*` variables
    /// override it.
    ///
    /// # Errors
    ///
    /// Fails if the config file cannot be read or parsed, an override does
    /// not parse, or the result does not validate.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        let mut cfg = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("reading scheduler config {path}"))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing scheduler config {path}"))?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    pub(crate) fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AppResult<()> {
        if let Some(v) = parse_var(&lookup, "SCHEDULER_WORKERS")? {
            self.pool.worker_count = v;
        }
        if let Some(v) = parse_var(&lookup, "SCHEDULER_MAX_QUEUE_DEPTH")? {
            self.max_queue_depth = v;
        }
        if let Some(v) = parse_var(&lookup, "SCHEDULER_MAX_PRIORITY")? {
            self.max_priority = v;
        }
        if let Some(v) = parse_var(&lookup, "SCHEDULER_CANCEL_GRACE_MS")? {
            self.cancel_grace_ms = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "SCHEDULER_MAX_CONFLICT_RETRIES")? {
            self.max_conflict_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "SCHEDULER_AUDIT_CAPACITY")? {
            self.audit_capacity = v;
        }
        if let Some(path) = lookup("SCHEDULER_STORE_PATH").filter(|p| !p.is_empty()) {
            self.store = StoreBackendConfig::File { path: path.into() };
        }
        Ok(())
    }

    /// Admission and query limits derived from this configuration.
    #[must_use]
    pub fn limits(&self) -> SchedulerLimits {
        SchedulerLimits {
            max_priority: self.max_priority,
            max_payload_bytes: self.max_payload_bytes,
            max_delay_ms: self.max_delay_ms,
            cancel_grace: self.cancel_grace_ms.map(Duration::from_millis),
            max_conflict_retries: self.max_conflict_retries,
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}"))
        })
        .transpose()
}
