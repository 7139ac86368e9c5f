use std::time::Duration;

/// CPU / memory percentages separating the three load levels.
#[derive(Debug, Clone, Copy)]
pub struct LoadThresholds {
    pub high_cpu_pct: f32,
    pub high_mem_pct: f32,
    pub critical_cpu_pct: f32,
    pub critical_mem_pct: f32,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            high_cpu_pct: 90.0,
            high_mem_pct: 90.0,
            critical_cpu_pct: 95.0,
            critical_mem_pct: 95.0,
        }
    }
}

/// Tunables for batch processing and throttling.
#[derive(Debug, Clone)]
pub struct BatchTuning {
    /// Files per batch under normal load.
    pub batch_size_normal: usize,
    /// Files per batch under high load.
    pub batch_size_low: usize,
    /// Pause between batches.
    pub sleep_between_batches: Duration,
    /// How long to back off while load is critical before re-polling.
    pub critical_backoff: Duration,
    pub load: LoadThresholds,
}

impl Default for BatchTuning {
    fn default() -> Self {
        Self {
            batch_size_normal: 10,
            batch_size_low: 2,
            sleep_between_batches: Duration::from_secs(2),
            critical_backoff: Duration::from_secs(30),
            load: LoadThresholds::default(),
        }
    }
}
