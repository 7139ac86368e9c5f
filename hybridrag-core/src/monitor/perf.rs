//! Rolling ingestion-rate tracking and degradation detection.

use serde::Serialize;
use tracing::info;

const DEFAULT_WINDOW: usize = 20;
const BASELINE_MIN_SAMPLES: usize = 5;
const RECENT_SAMPLES: usize = 3;
const WARNING_COOLDOWN_CYCLES: u32 = 5;

/// Emitted when the recent ingestion rate falls below the baseline by at
/// least the configured percentage.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PerfWarning {
    pub baseline_rate: f64,
    pub current_rate: f64,
    pub degradation_pct: f64,
    pub threshold_pct: u32,
}

/// Keeps a bounded window of per-cycle ingestion rates (docs/minute).
///
/// The baseline is the mean of the window once at least five samples have
/// arrived; afterwards each cycle compares the mean of the last three
/// samples against it. Warnings are rate-limited to one per five cycles.
#[derive(Debug)]
pub struct PerformanceTracker {
    window_size: usize,
    threshold_pct: u32,
    rates: Vec<f64>,
    baseline: Option<f64>,
    cycles_since_warning: u32,
}

impl PerformanceTracker {
    pub fn new(threshold_pct: u32) -> Self {
        Self::with_window(DEFAULT_WINDOW, threshold_pct)
    }

    pub fn with_window(window_size: usize, threshold_pct: u32) -> Self {
        Self {
            window_size,
            threshold_pct,
            rates: Vec::new(),
            baseline: None,
            cycles_since_warning: 0,
        }
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn sample_count(&self) -> usize {
        self.rates.len()
    }

    fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn recent_mean(&self) -> f64 {
        if self.rates.len() < RECENT_SAMPLES {
            Self::mean(&self.rates)
        } else {
            Self::mean(&self.rates[self.rates.len() - RECENT_SAMPLES..])
        }
    }

    /// Record one ingestion cycle. Returns a warning when degradation
    /// crosses the threshold and the cooldown has elapsed.
    pub fn record(&mut self, docs: usize, duration_secs: f64) -> Option<PerfWarning> {
        if docs == 0 || duration_secs <= 0.0 {
            return None;
        }

        let docs_per_minute = (docs as f64 / duration_secs) * 60.0;
        self.rates.push(docs_per_minute);
        if self.rates.len() > self.window_size {
            self.rates.remove(0);
        }

        if self.baseline.is_none() && self.rates.len() >= BASELINE_MIN_SAMPLES {
            let baseline = Self::mean(&self.rates);
            info!("Performance baseline established: {baseline:.1} docs/min");
            self.baseline = Some(baseline);
        }

        self.cycles_since_warning += 1;
        let baseline = self.baseline?;
        if self.rates.len() < RECENT_SAMPLES
            || self.cycles_since_warning < WARNING_COOLDOWN_CYCLES
        {
            return None;
        }

        let current = self.recent_mean();
        let degradation_pct = (baseline - current) / baseline * 100.0;
        if degradation_pct >= self.threshold_pct as f64 {
            self.cycles_since_warning = 0;
            Some(PerfWarning {
                baseline_rate: baseline,
                current_rate: current,
                degradation_pct,
                threshold_pct: self.threshold_pct,
            })
        } else {
            None
        }
    }
}
