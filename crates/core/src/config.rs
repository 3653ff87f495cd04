//! Steward configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Values are validated once at load time.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StewardConfig {
    /// Control loop settings.
    pub controller: ControllerSettings,
    /// Per-key retry backoff.
    pub backoff: BackoffSettings,
    /// Automation server connection.
    pub automation: AutomationSettings,
}

/// Control loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSettings {
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    /// Interval between full resyncs.
    pub resync_interval_secs: u64,
    /// Deadline for a single reconcile pass.
    pub reconcile_timeout_secs: u64,
    /// Upper bound on draining in-flight work at shutdown.
    pub shutdown_timeout_secs: u64,
    /// In-process restarts after an update conflict before requeueing.
    pub max_conflict_retries: u32,
    /// Re-query the automation server for objects synced longer ago than this.
    pub reverify_interval_secs: Option<u64>,
    /// Restrict the controller to a single namespace.
    pub namespace: Option<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_interval_secs: 300,
            reconcile_timeout_secs: 60,
            shutdown_timeout_secs: 30,
            max_conflict_retries: 5,
            reverify_interval_secs: None,
            namespace: None,
        }
    }
}

impl ControllerSettings {
    /// Resync interval as a `Duration`.
    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Reconcile deadline as a `Duration`.
    #[must_use]
    pub const fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Shutdown drain bound as a `Duration`.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Re-verification window, if enabled.
    #[must_use]
    pub fn reverify_interval(&self) -> Option<Duration> {
        self.reverify_interval_secs.map(Duration::from_secs)
    }
}

/// Exponential backoff settings for failed keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    /// Delay after the first failure.
    pub base_delay_ms: u64,
    /// Cap on the delay, however many failures accumulate.
    pub max_delay_ms: u64,
    /// Spread delays randomly over `[delay/2, delay]`.
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            jitter: false,
        }
    }
}

/// Automation server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutomationSettings {
    /// Base URL, e.g. `http://jenkins.devops.svc:8080/`.
    pub url: Option<String>,
    /// API user.
    pub username: Option<String>,
    /// API token for `username`.
    pub token: Option<String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            token: None,
            request_timeout_secs: 30,
        }
    }
}

impl AutomationSettings {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl StewardConfig {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or holds
    /// out-of-range values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| Error::toml_parse_failed(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise return validated defaults.
    ///
    /// # Errors
    ///
    /// See [`StewardConfig::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(
            || {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            },
            Self::load,
        )
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;
        if c.workers == 0 {
            return Err(Error::invalid_config(
                "controller.workers",
                "must be at least 1",
            ));
        }
        if c.resync_interval_secs == 0 {
            return Err(Error::invalid_config(
                "controller.resync_interval_secs",
                "must be positive",
            ));
        }
        if c.reconcile_timeout_secs == 0 {
            return Err(Error::invalid_config(
                "controller.reconcile_timeout_secs",
                "must be positive",
            ));
        }
        if c.reverify_interval_secs == Some(0) {
            return Err(Error::invalid_config(
                "controller.reverify_interval_secs",
                "must be positive when set",
            ));
        }
        if c.namespace.as_deref().is_some_and(str::is_empty) {
            return Err(Error::invalid_config(
                "controller.namespace",
                "must not be empty when set",
            ));
        }

        let b = &self.backoff;
        if b.base_delay_ms == 0 {
            return Err(Error::invalid_config(
                "backoff.base_delay_ms",
                "must be positive",
            ));
        }
        if b.max_delay_ms < b.base_delay_ms {
            return Err(Error::invalid_config(
                "backoff.max_delay_ms",
                format!("must be >= base_delay_ms ({})", b.base_delay_ms),
            ));
        }

        if let Some(url) = self.automation.url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::invalid_config(
                    "automation.url",
                    format!("'{url}' is not an http(s) URL"),
                ));
            }
        }
        if self.automation.username.is_some() != self.automation.token.is_some() {
            return Err(Error::invalid_config(
                "automation.token",
                "username and token must be set together",
            ));
        }
        Ok(())
    }
}
