use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TailError};

// =============================================================================
// Tail tunables (figment-deserialized from defaults / tail.toml / env vars)
// =============================================================================
//
//   tail.toml:   backlog = 50
//                poll_interval_ms = 5
//
//   env var:     TAIL_BACKLOG=50
//
// The two miss thresholds are counted in poll iterations, so they only make
// sense relative to `poll_interval_ms`. Tune them together.

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TailConfig {
    /// Lines replayed from the end of a file when the tail starts.
    #[serde(default = "default_backlog")]
    pub backlog: usize,
    /// Sleep between reads once the source has nothing new.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive empty polls before the file's modification time is noted.
    #[serde(default = "default_stat_after_misses")]
    pub stat_after_misses: u32,
    /// Consecutive empty polls before the noted time is compared again and
    /// the file reopened if it was rewritten.
    #[serde(default = "default_reattach_after_misses")]
    pub reattach_after_misses: u32,
    /// How long `stop()` waits for the follow thread to exit.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Name of the follow thread. Derived from the source when unset.
    #[serde(default)]
    pub thread_name: Option<String>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            poll_interval_ms: default_poll_interval_ms(),
            stat_after_misses: default_stat_after_misses(),
            reattach_after_misses: default_reattach_after_misses(),
            join_timeout_ms: default_join_timeout_ms(),
            thread_name: None,
        }
    }
}

fn default_backlog() -> usize {
    20
}
fn default_poll_interval_ms() -> u64 {
    1
}
fn default_stat_after_misses() -> u32 {
    1000
}
fn default_reattach_after_misses() -> u32 {
    4000
}
fn default_join_timeout_ms() -> u64 {
    2000
}

impl TailConfig {
    /// Layer defaults → optional TOML file → `TAIL_*` env vars.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(TailConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed("TAIL_"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: TailConfig = Self::figment(file).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TailError::InvalidConfig(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.stat_after_misses == 0 {
            return Err(TailError::InvalidConfig(
                "stat_after_misses must be at least 1".to_string(),
            ));
        }
        if self.reattach_after_misses <= self.stat_after_misses {
            return Err(TailError::InvalidConfig(format!(
                "reattach_after_misses ({}) must exceed stat_after_misses ({})",
                self.reattach_after_misses, self.stat_after_misses
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
