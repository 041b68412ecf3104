//! Runtime Configuration
//!
//! Tunables of the query pipeline, loaded from `variantstore.toml` merged
//! with `VARIANTSTORE_*` environment variables.
//!
//! ```toml
//! # variantstore.toml
//! materialization_cutoff = 100000
//! result_batch_size = 1000
//! query_timeout_secs = 60
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! VARIANTSTORE_QUERY_TIMEOUT_SECS=120
//! ```

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Runtime tunables of the query pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Result-set size above which streaming actions emit lazy batches
    /// instead of materialising rows (sorting is then unavailable).
    #[serde(default = "default_materialization_cutoff")]
    pub materialization_cutoff: u64,

    /// Rows per streamed record batch.
    #[serde(default = "default_result_batch_size")]
    pub result_batch_size: u32,

    /// Wall-clock budget per query in seconds; 0 disables the deadline.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Positions per work chunk in the mutation sweep; cancellation is
    /// checked between chunks.
    #[serde(default = "default_mutation_sweep_grain")]
    pub mutation_sweep_grain: usize,
}

fn default_materialization_cutoff() -> u64 {
    100_000
}

fn default_result_batch_size() -> u32 {
    1_000
}

fn default_query_timeout_secs() -> u64 {
    60
}

fn default_mutation_sweep_grain() -> usize {
    300
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            materialization_cutoff: default_materialization_cutoff(),
            result_batch_size: default_result_batch_size(),
            query_timeout_secs: default_query_timeout_secs(),
            mutation_sweep_grain: default_mutation_sweep_grain(),
        }
    }
}

impl RuntimeConfig {
    /// Load from `variantstore.toml` and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("variantstore.toml"))
            .merge(Env::prefixed("VARIANTSTORE_"))
            .extract()
    }

    /// The per-query deadline, or `None` when disabled.
    pub fn query_timeout(&self) -> Option<Duration> {
        if self.query_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.query_timeout_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = RuntimeConfig::default();
        assert!(config.materialization_cutoff > 0);
        assert!(config.result_batch_size > 0);
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_timeout_disables_the_deadline() {
        let config = RuntimeConfig {
            query_timeout_secs: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.query_timeout(), None);
    }
}
