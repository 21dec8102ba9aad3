//! Configuration for the microbatch scheduler
//!
//! A scheduler is parameterized by two release triggers: a size threshold
//! and a linger delay. Validation happens once, at construction, so the
//! queue and worker never have to re-check their bounds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{SchedulerError, SchedulerResult};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum batch size released to the processor (size trigger, >= 1)
    pub max_batch_size: usize,
    /// Maximum time a non-empty buffer waits before releasing a partial
    /// batch (time trigger). Zero disables the timer entirely: batches are
    /// released only when `max_batch_size` items have accumulated.
    pub max_batch_delay: Duration,
}

impl SchedulerConfig {
    /// Validate the configuration, raising `Configuration` on invalid bounds.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_batch_size == 0 {
            return Err(SchedulerError::Configuration {
                reason: "max_batch_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_batch_delay: Duration::from_millis(250),
        }
    }
}
