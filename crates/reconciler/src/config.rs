//! Configuration for controllers, sources, and the manager.
//!
//! Durations are written as whole milliseconds.

use std::time::Duration;

use converge_core::config::duration_ms;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rate_limiter::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX};

fn default_max_concurrent_reconciles() -> usize {
    1
}

fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_base() -> Duration {
    DEFAULT_BACKOFF_BASE
}

fn default_backoff_max() -> Duration {
    DEFAULT_BACKOFF_MAX
}

fn default_reconnect_base() -> Duration {
    Duration::from_millis(100)
}

fn default_reconnect_max() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Per-controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of workers pulling from the controller's queue.
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Deadline for a single reconcile call.
    #[serde(default = "default_reconcile_timeout", with = "duration_ms")]
    pub reconcile_timeout: Duration,

    /// Delay after the first failure of a key.
    #[serde(default = "default_backoff_base", with = "duration_ms")]
    pub backoff_base: Duration,

    /// Ceiling on the per-key failure delay.
    #[serde(default = "default_backoff_max", with = "duration_ms")]
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            reconcile_timeout: default_reconcile_timeout(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
        }
    }
}

impl ControllerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any setting is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::invalid_config(
                "max_concurrent_reconciles must be greater than 0",
            ));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::invalid_config("reconcile_timeout must be greater than 0"));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::invalid_config("backoff_base must be greater than 0"));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::invalid_config(
                "backoff_max must not be less than backoff_base",
            ));
        }
        Ok(())
    }
}

/// Watch reconnect settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_reconnect_base", with = "duration_ms")]
    pub reconnect_base: Duration,

    #[serde(default = "default_reconnect_max", with = "duration_ms")]
    pub reconnect_max: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            reconnect_base: default_reconnect_base(),
            reconnect_max: default_reconnect_max(),
        }
    }
}

impl SourceConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconnect bounds are inverted or zero.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_base.is_zero() {
            return Err(Error::invalid_config("reconnect_base must be greater than 0"));
        }
        if self.reconnect_max < self.reconnect_base {
            return Err(Error::invalid_config(
                "reconnect_max must not be less than reconnect_base",
            ));
        }
        Ok(())
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Deadline on every store call.
    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,

    /// How long teardown may take once shutdown starts.
    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ManagerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::invalid_config("request_timeout must be greater than 0"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(Error::invalid_config("shutdown_timeout must be greater than 0"));
        }
        Ok(())
    }
}
