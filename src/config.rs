// THEORY:
// All tunable behavior of the engine is gathered in plain `Clone` structs under one
// `PipelineConfig`. Defaults are
// production values; `from_env` lets an operator override individual knobs without
// a rebuild. A malformed override is logged and ignored; start up never fails on
// one.

use std::time::Duration;

/// Knobs of the worker-pool scheduler.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on concurrently running optimizations.
    pub max_workers: usize,
    /// Workers created eagerly at start; the rest are created on demand.
    pub initial_workers: usize,
    /// Added to a request's own time limit to form the scheduler's outer ceiling.
    pub timeout_grace: Duration,
    /// How many times a request is resubmitted after a worker fault.
    pub max_retries: u32,
    /// Deadline for a worker to answer a liveness probe.
    pub health_probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().clamp(1, 8),
            initial_workers: 1,
            timeout_grace: Duration::from_secs(5),
            max_retries: 1,
            health_probe_timeout: Duration::from_millis(250),
        }
    }
}

/// Knobs of the optimization search loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Evaluations between cancellation/deadline checks.
    pub checkpoint_every: u64,
    /// Evaluations between progress reports.
    pub progress_every: u64,
    /// Wall-clock time between progress reports.
    pub progress_interval: Duration,
    /// Candidate sets larger than this use the Parzen sampler under `auto`.
    pub auto_parzen_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 8,
            progress_every: 64,
            progress_interval: Duration::from_millis(100),
            auto_parzen_threshold: 20,
        }
    }
}

/// Top-level configuration for a `MixingPipeline`.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub pool: PoolConfig,
    pub engine: EngineConfig,
}

impl PipelineConfig {
    /// Defaults overridden by `PAINT_MIXER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let pool = &mut config.pool;
        let engine = &mut config.engine;

        override_with(&lookup, "PAINT_MIXER_MAX_WORKERS", &mut pool.max_workers);
        override_with(&lookup, "PAINT_MIXER_INITIAL_WORKERS", &mut pool.initial_workers);
        override_with(&lookup, "PAINT_MIXER_MAX_RETRIES", &mut pool.max_retries);
        override_millis(&lookup, "PAINT_MIXER_TIMEOUT_GRACE_MS", &mut pool.timeout_grace);
        override_millis(&lookup, "PAINT_MIXER_HEALTH_PROBE_MS", &mut pool.health_probe_timeout);
        override_with(&lookup, "PAINT_MIXER_CHECKPOINT_EVERY", &mut engine.checkpoint_every);
        override_with(&lookup, "PAINT_MIXER_PROGRESS_EVERY", &mut engine.progress_every);
        override_millis(&lookup, "PAINT_MIXER_PROGRESS_INTERVAL_MS", &mut engine.progress_interval);
        override_with(&lookup, "PAINT_MIXER_PARZEN_THRESHOLD", &mut engine.auto_parzen_threshold);

        config.normalized()
    }

    /// Repairs combinations that cannot work (zero workers, zero checkpoints).
    pub fn normalized(mut self) -> Self {
        self.pool.max_workers = self.pool.max_workers.max(1);
        self.pool.initial_workers = self.pool.initial_workers.min(self.pool.max_workers);
        self.engine.checkpoint_every = self.engine.checkpoint_every.max(1);
        self.engine.progress_every = self.engine.progress_every.max(1);
        self
    }
}

fn override_with<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => log::warn!("ignoring {key}={raw:?}: not a valid value"),
        }
    }
}

fn override_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    override_with(lookup, key, &mut millis);
    *slot = Duration::from_millis(millis);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert!(config.pool.max_workers >= 1);
        assert!(config.pool.initial_workers <= config.pool.max_workers);
        assert!(config.engine.checkpoint_every > 0);
    }

    #[test_log::test]
    fn environment_overrides_apply() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("PAINT_MIXER_MAX_WORKERS", "3"),
            ("PAINT_MIXER_TIMEOUT_GRACE_MS", "1500"),
            ("PAINT_MIXER_PARZEN_THRESHOLD", "40"),
        ]));
        assert_eq!(config.pool.max_workers, 3);
        assert_eq!(config.pool.timeout_grace, Duration::from_millis(1500));
        assert_eq!(config.engine.auto_parzen_threshold, 40);
    }

    #[test_log::test]
    fn malformed_overrides_are_ignored() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("PAINT_MIXER_MAX_RETRIES", "lots"),
            ("PAINT_MIXER_CHECKPOINT_EVERY", "-4"),
        ]));
        let defaults = PipelineConfig::default();
        assert_eq!(config.pool.max_retries, defaults.pool.max_retries);
        assert_eq!(config.engine.checkpoint_every, defaults.engine.checkpoint_every);
    }

    #[test]
    fn impossible_combinations_are_normalized() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("PAINT_MIXER_MAX_WORKERS", "0"),
            ("PAINT_MIXER_INITIAL_WORKERS", "9"),
        ]));
        assert_eq!(config.pool.max_workers, 1);
        assert_eq!(config.pool.initial_workers, 1);
    }
}
