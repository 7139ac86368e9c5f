//! Load-adaptive throttling inputs.
//!
//! The ingestion loops poll the current CPU and memory pressure immediately
//! before each batch, never mid-batch. Three levels: `Normal` runs the full
//! batch size, `High` drops to the reduced size, `Critical` pauses until
//! pressure falls.

use std::sync::Arc;

use async_trait::async_trait;
use sysinfo::System;
use tokio::sync::Mutex;

use super::tuning::LoadThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadLevel {
    Normal,
    High,
    Critical,
}

/// One poll of system pressure.
#[derive(Debug, Clone)]
pub struct LoadSample {
    pub level: LoadLevel,
    pub cpu_pct: f32,
    pub mem_pct: f32,
    pub reason: String,
}

/// Source of raw CPU/memory readings. Swappable so throttling decisions can
/// be tested without generating real load.
#[async_trait]
pub trait LoadProbe: Send + Sync {
    /// Current (cpu %, memory %) usage.
    async fn cpu_mem_pct(&self) -> (f32, f32);
}

/// Real readings via sysinfo. CPU usage needs two refreshes separated by a
/// short interval to be meaningful.
#[derive(Debug)]
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadProbe for SysinfoProbe {
    async fn cpu_mem_pct(&self) -> (f32, f32) {
        let mut system = self.system.lock().await;
        system.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu = system.global_cpu_usage();
        let total = system.total_memory();
        let mem = if total == 0 {
            0.0
        } else {
            (system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        (cpu, mem)
    }
}

/// Classifies probe readings against the configured thresholds.
pub struct LoadMonitor {
    probe: Arc<dyn LoadProbe>,
    thresholds: LoadThresholds,
}

impl std::fmt::Debug for LoadMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadMonitor")
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl LoadMonitor {
    pub fn new(thresholds: LoadThresholds) -> Self {
        Self::with_probe(thresholds, Arc::new(SysinfoProbe::new()))
    }

    pub fn with_probe(thresholds: LoadThresholds, probe: Arc<dyn LoadProbe>) -> Self {
        Self { probe, thresholds }
    }

    pub async fn sample(&self) -> LoadSample {
        let (cpu_pct, mem_pct) = self.probe.cpu_mem_pct().await;
        let t = &self.thresholds;

        let (level, reason) = if cpu_pct >= t.critical_cpu_pct {
            (
                LoadLevel::Critical,
                format!("CPU {cpu_pct:.1}% >= {:.0}%", t.critical_cpu_pct),
            )
        } else if mem_pct >= t.critical_mem_pct {
            (
                LoadLevel::Critical,
                format!("memory {mem_pct:.1}% >= {:.0}%", t.critical_mem_pct),
            )
        } else if cpu_pct >= t.high_cpu_pct {
            (LoadLevel::High, format!("CPU {cpu_pct:.1}% (high load)"))
        } else if mem_pct >= t.high_mem_pct {
            (LoadLevel::High, format!("memory {mem_pct:.1}% (high load)"))
        } else {
            (LoadLevel::Normal, String::new())
        };

        LoadSample {
            level,
            cpu_pct,
            mem_pct,
            reason,
        }
    }
}
