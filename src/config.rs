//! Configuration for the background synchronizer.
//!
//! All fields have defaults suitable for a daemon that keeps a local copy of
//! a slowly-changing configuration database.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SynchronizerConfig {
    /// Pause between synchronization attempts while the repository holds
    /// data. The shorter of the two intervals: live data is re-polled
    /// promptly.
    #[serde(default = "default_data_found_interval_secs")]
    pub data_found_interval_secs: u64,

    /// Pause between synchronization attempts while the repository is empty.
    #[serde(default = "default_no_data_interval_secs")]
    pub no_data_interval_secs: u64,

    /// Pause between attempts when forcing an initial read at startup.
    #[serde(default = "default_force_refresh_interval_secs")]
    pub force_refresh_interval_secs: u64,
}

fn default_data_found_interval_secs() -> u64 {
    10
}
fn default_no_data_interval_secs() -> u64 {
    60
}
fn default_force_refresh_interval_secs() -> u64 {
    10
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            data_found_interval_secs: default_data_found_interval_secs(),
            no_data_interval_secs: default_no_data_interval_secs(),
            force_refresh_interval_secs: default_force_refresh_interval_secs(),
        }
    }
}

impl SynchronizerConfig {
    pub fn data_found_interval(&self) -> Duration {
        Duration::from_secs(self.data_found_interval_secs)
    }

    pub fn no_data_interval(&self) -> Duration {
        Duration::from_secs(self.no_data_interval_secs)
    }

    pub fn force_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.force_refresh_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SynchronizerConfig::default();
        assert_eq!(config.data_found_interval(), Duration::from_secs(10));
        assert_eq!(config.no_data_interval(), Duration::from_secs(60));
        assert_eq!(config.force_refresh_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_data_found_polls_more_often_than_no_data() {
        let config = SynchronizerConfig::default();
        assert!(config.data_found_interval() < config.no_data_interval());
    }
}
