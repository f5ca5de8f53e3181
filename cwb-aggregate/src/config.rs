//! Pipeline tuning knobs.

use cwb_core::{CwbError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// How a slice spreads its units over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Units are processed one after another on the calling thread.
    Serial,
    /// Units are processed on a bounded worker pool.
    #[default]
    Parallel,
}

/// Settings shared by the tile index, the engine and the retry ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Waterbodies processed per slice.
    pub slice_size: usize,
    /// Worker threads used in parallel mode.
    pub workers: usize,
    /// Failed attempts after which a ledger record turns permanent.
    pub max_attempts: u32,
    pub mode: ExecutionMode,
}

pub const DEFAULT_SLICE_SIZE: usize = 100;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slice_size: DEFAULT_SLICE_SIZE,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            mode: ExecutionMode::Parallel,
        }
    }
}

impl PipelineConfig {
    pub fn with_slice_size(mut self, slice_size: usize) -> Self {
        self.slice_size = slice_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.slice_size == 0 {
            return Err(CwbError::Config("slice size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(CwbError::Config("worker count must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(CwbError::Config("max attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Worker pool sized by `workers`; `None` in serial mode.
    pub fn build_pool(&self) -> Result<Option<ThreadPool>> {
        self.validate()?;
        if self.mode == ExecutionMode::Serial {
            return Ok(None);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("cwb-worker-{}", i))
            .build()
            .map_err(|e| CwbError::Config(format!("failed to start worker pool: {}", e)))?;
        Ok(Some(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.slice_size, 100);
        assert_eq!(config.max_attempts, 3);
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(PipelineConfig::default().with_slice_size(0).validate().is_err());
        assert!(PipelineConfig::default().with_workers(0).validate().is_err());
        assert!(PipelineConfig::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn serial_mode_has_no_pool() {
        let serial = PipelineConfig::default().with_mode(ExecutionMode::Serial);
        assert!(serial.build_pool().unwrap().is_none());

        let parallel = PipelineConfig::default().with_workers(2);
        let pool = parallel.build_pool().unwrap().unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
