//! Error types and handling for the microbatch scheduler
//!
//! Failure taxonomy for:
//! - Construction-time configuration validation
//! - Wholesale downstream batch processor failures
//! - Scheduler shutdown

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Main error type for the microbatch scheduler
///
/// Every variant is cheaply clonable so a single wholesale failure can be
/// fanned out to every caller waiting on the affected batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration: {reason}")]
    Configuration { reason: String },

    #[error("batch processor failed: {0}")]
    Processor(#[from] ProcessorError),

    #[error("batch processor returned {actual} responses for {expected} requests")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("scheduler is shutting down")]
    Shutdown,
}

/// Wholesale failure reported by a downstream batch processor
///
/// Carries only a message: the processor is an opaque, possibly remote
/// capability, and the scheduler recovers from its failures rather than
/// inspecting them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProcessorError {
    pub message: String,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl SchedulerError {
    /// Whether the error was produced by the downstream processor rather
    /// than the scheduler itself.
    pub fn is_processor_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::Processor(_) | SchedulerError::ShapeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_error_converts_into_scheduler_error() {
        let err: SchedulerError = ProcessorError::new("rate limited").into();
        assert!(err.is_processor_failure());
        assert_eq!(err.to_string(), "batch processor failed: rate limited");
    }

    #[test]
    fn shutdown_is_not_a_processor_failure() {
        assert!(!SchedulerError::Shutdown.is_processor_failure());
    }
}
