use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::distribution::DistributionConfig;
use crate::error::{Error, Result};
use crate::graph::Mode;

/// Settings for the task scheduler.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads used to run the ready tasks of one worker. With one thread,
    /// tasks run on the scheduler thread.
    pub num_threads: usize,

    pub mode: Mode,

    /// Give up with a stall error after this long without progress. Only
    /// consulted when other workers could still send messages; a lone worker
    /// with nothing to do is stalled at once.
    pub stall_timeout_ms: Option<u64>,

    /// How long an idle worker waits for a remote message before checking
    /// the stall timeout again.
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            mode: Mode::Push,
            stall_timeout_ms: None,
            poll_interval_ms: 1,
        }
    }
}

impl RuntimeConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Everything a run can be configured with. Every field has a default, so
/// a configuration file only needs to name what it changes:
///
/// ```toml
/// [distribution]
/// strategy = "knapsack"
///
/// [runtime]
/// num_threads = 4
/// mode = "pull"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub distribution: DistributionConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Config;
    use crate::distribution::Strategy;
    use crate::graph::Mode;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn sections_override_only_what_they_name() {
        let config = Config::from_toml_str(
            r#"
            [distribution]
            strategy = "round_robin_sfc"
            nmax = 8

            [runtime]
            num_threads = 4
            mode = "pull"
            stall_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.distribution.strategy, Strategy::RoundRobinSfc);
        assert_eq!(config.distribution.nmax, Some(8));
        assert!(config.distribution.full_knapsack);
        assert_eq!(config.runtime.num_threads, 4);
        assert_eq!(config.runtime.mode, Mode::Pull);
        assert_eq!(config.runtime.stall_timeout().unwrap().as_millis(), 500);
        assert_eq!(config.runtime.poll_interval_ms, 1);
    }

    #[test]
    fn unknown_strategy_is_a_config_error() {
        assert!(Config::from_toml_str("[distribution]\nstrategy = \"hilbert\"").is_err());
    }
}
