//! Configuration for the cloud agent.

use std::time::Duration;

use anyhow::{Context, Result};

/// Cloud agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Image whose instances this agent tracks.
    pub image_id: String,

    /// Instance names to track at startup.
    pub instances: Vec<String>,

    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,

    /// Interval between polls of in-flight remote tasks.
    pub task_poll_interval: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let image_id = lookup("VMCLOUD_IMAGE_ID").unwrap_or_else(|| "default-image".to_string());

        let instances = lookup("VMCLOUD_INSTANCES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let reconcile_interval_secs = match lookup("VMCLOUD_POLL_INTERVAL_SECS") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("invalid VMCLOUD_POLL_INTERVAL_SECS: {value}"))?,
            None => 10,
        };

        let task_poll_interval_ms = match lookup("VMCLOUD_TASK_POLL_INTERVAL_MS") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("invalid VMCLOUD_TASK_POLL_INTERVAL_MS: {value}"))?,
            None => 500,
        };

        let log_level = lookup("VMCLOUD_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            image_id,
            instances,
            reconcile_interval: Duration::from_secs(reconcile_interval_secs),
            task_poll_interval: Duration::from_millis(task_poll_interval_ms),
            log_level,
        })
    }
}
