use serde::{Deserialize, Serialize};

use crate::error::EtlError;

/// Settings handed to the parallel execution layer that runs a parse.
///
/// Memory thresholds are fractions of each worker's memory limit. Workers
/// throttle near `worker_mem_target`, spill past `worker_mem_spill`, stop
/// taking tasks past `worker_mem_pause` and are restarted past
/// `worker_mem_terminate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub scheduler_worker_saturation: f64,
    pub worker_mem_target: f64,
    pub worker_mem_spill: f64,
    pub worker_mem_pause: f64,
    pub worker_mem_terminate: f64,
    pub num_workers: usize,
    pub num_threads: usize,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            scheduler_worker_saturation: 1.2,
            worker_mem_target: 0.65,
            worker_mem_spill: 0.65,
            worker_mem_pause: 0.92,
            worker_mem_terminate: 0.98,
            // a single worker avoids moving chunks between workers
            num_workers: 1,
            num_threads: default_thread_count(),
        }
    }
}

impl ComputeConfig {
    pub fn apply(&mut self, overrides: &ComputeOverrides) {
        if let Some(value) = overrides.scheduler_worker_saturation {
            self.scheduler_worker_saturation = value;
        }
        if let Some(value) = overrides.worker_mem_target {
            self.worker_mem_target = value;
        }
        if let Some(value) = overrides.worker_mem_spill {
            self.worker_mem_spill = value;
        }
        if let Some(value) = overrides.worker_mem_pause {
            self.worker_mem_pause = value;
        }
        if let Some(value) = overrides.worker_mem_terminate {
            self.worker_mem_terminate = value;
        }
        if let Some(value) = overrides.num_workers {
            self.num_workers = value;
        }
        if let Some(value) = overrides.num_threads {
            self.num_threads = value;
        }
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.scheduler_worker_saturation <= 0.0 {
            return Err(EtlError::InvalidConfig(
                "scheduler worker saturation must be positive".to_string(),
            ));
        }
        let thresholds = [
            ("target", self.worker_mem_target),
            ("spill", self.worker_mem_spill),
            ("pause", self.worker_mem_pause),
            ("terminate", self.worker_mem_terminate),
        ];
        for (label, value) in thresholds {
            if !(value > 0.0 && value <= 1.0) {
                return Err(EtlError::InvalidConfig(format!(
                    "worker memory {label} threshold must be in (0, 1], got {value}"
                )));
            }
        }
        for pair in thresholds.windows(2) {
            if pair[0].1 > pair[1].1 {
                return Err(EtlError::InvalidConfig(format!(
                    "worker memory {} threshold ({}) exceeds {} threshold ({})",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                )));
            }
        }
        if self.num_workers == 0 || self.num_threads == 0 {
            return Err(EtlError::InvalidConfig(
                "compute layer needs at least one worker and one thread".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComputeOverrides {
    #[serde(default)]
    pub scheduler_worker_saturation: Option<f64>,
    #[serde(default)]
    pub worker_mem_target: Option<f64>,
    #[serde(default)]
    pub worker_mem_spill: Option<f64>,
    #[serde(default)]
    pub worker_mem_pause: Option<f64>,
    #[serde(default)]
    pub worker_mem_terminate: Option<f64>,
    #[serde(default)]
    pub num_workers: Option<usize>,
    #[serde(default)]
    pub num_threads: Option<usize>,
}

fn default_thread_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    ((cpus as f64 * 0.75) as usize).max(1)
}
