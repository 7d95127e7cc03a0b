use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Run-level settings shared by every estimator: seeding, variable
/// partitioning and logging cadence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seed for shuffling and SDCA example order. `None` draws from entropy.
    pub random_seed: Option<u64>,
    /// Upper bound on the number of shards a weight variable is split into.
    pub num_ps_replicas: usize,
    /// Minimum shard size in bytes before a variable is split.
    pub min_slice_size: usize,
    /// Emit a training log line every this many steps.
    pub log_step_count_steps: usize,
}

impl RunConfig {
    pub fn new() -> Self {
        Self {
            random_seed: None,
            num_ps_replicas: 0,
            min_slice_size: 64 << 20,
            log_step_count_steps: 100,
        }
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn num_ps_replicas(mut self, num_ps_replicas: usize) -> Self {
        self.num_ps_replicas = num_ps_replicas;
        self
    }

    pub fn min_slice_size(mut self, min_slice_size: usize) -> Self {
        if min_slice_size == 0 {
            panic!("min_slice_size must be > 0, got {}", min_slice_size);
        }
        self.min_slice_size = min_slice_size;
        self
    }

    pub fn log_step_count_steps(mut self, steps: usize) -> Self {
        if steps == 0 {
            panic!("log_step_count_steps must be > 0, got {}", steps);
        }
        self.log_step_count_steps = steps;
        self
    }

    /// Parses a config from JSON; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// RNG for the given salt, deterministic when a seed is configured.
    pub(crate) fn rng(&self, salt: u64) -> StdRng {
        match self.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15)),
            None => StdRng::from_entropy(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_defaults() {
        let config = RunConfig::new();
        assert_eq!(config.random_seed, None);
        assert_eq!(config.num_ps_replicas, 0);
        assert_eq!(config.min_slice_size, 64 << 20);
        assert_eq!(config.log_step_count_steps, 100);
    }

    #[test]
    fn test_from_json_partial() {
        let config = RunConfig::from_json(r#"{"random_seed": 7, "num_ps_replicas": 2}"#).unwrap();
        assert_eq!(config.random_seed, Some(7));
        assert_eq!(config.num_ps_replicas, 2);
        assert_eq!(config.log_step_count_steps, 100);
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let config = RunConfig::new().random_seed(3);
        let a: u64 = config.rng(5).r#gen();
        let b: u64 = config.rng(5).r#gen();
        let c: u64 = config.rng(6).r#gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_min_slice_size() {
        std::panic::catch_unwind(|| {
            RunConfig::new().min_slice_size(0);
        })
        .expect_err("Should panic on zero min_slice_size");
    }
}
