//! Claim engine settings

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Prefix of environment overrides, `CDK_CLAIM__POLL_INTERVAL_SECS=2`
pub const ENV_PREFIX: &str = "CDK_CLAIM";

/// Claim engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Seconds between status checks of polled quotes
    pub poll_interval_secs: u64,
    /// Seconds between status checks after the mint rate limited us
    pub rate_limited_poll_interval_secs: u64,
    /// First delay before reopening a failed subscription
    pub subscription_backoff_initial_secs: u64,
    /// Upper bound of the subscription retry delay
    pub subscription_backoff_max_secs: u64,
    /// Consecutive tracking failures before a mint is reported degraded
    pub degraded_threshold: u32,
    /// Status check attempts when a quote deadline fires
    pub deadline_check_retries: u32,
    /// Attempts of the cross mint quote resolver
    pub resolver_max_attempts: u32,
    /// Retries of a lifecycle transition after a version conflict
    pub version_conflict_retries: u32,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            rate_limited_poll_interval_secs: 30,
            subscription_backoff_initial_secs: 1,
            subscription_backoff_max_secs: 60,
            degraded_threshold: 5,
            deadline_check_retries: 3,
            resolver_max_attempts: 5,
            version_conflict_retries: 3,
        }
    }
}

impl ClaimConfig {
    /// Load settings from a TOML file over the defaults, then apply
    /// `CDK_CLAIM__*` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Poll interval while rate limited
    pub fn rate_limited_poll_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limited_poll_interval_secs)
    }

    /// Subscription retry delay after `failures` consecutive failures
    pub fn subscription_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let secs = self
            .subscription_backoff_initial_secs
            .saturating_mul(1u64 << exponent)
            .min(self.subscription_backoff_max_secs);
        Duration::from_secs(secs)
    }
}
