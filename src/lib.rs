//! # microbatch
//!
//! A micro-batching request scheduler: individually-submitted requests are
//! coalesced into bounded batches for a downstream processor that is itself
//! batch-oriented, and each caller asynchronously receives exactly the
//! result computed for its own request.
//!
//! - **Batching queue**: accumulates items and releases a group when either
//!   a size threshold is reached or a linger timeout elapses, whichever
//!   comes first
//! - **Scheduler**: a single worker task drains one batch at a time, calls
//!   the [`BatchProcessor`], and correlates the order-preserving results
//!   back to the waiting callers
//! - **Exactly-once resolution**: every submission is resolved exactly once
//!   with a value or a well-typed failure, including wholesale processor
//!   failures and shutdown
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use microbatch::{BatchProcessor, ProcessorError, Scheduler, SchedulerConfig};
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl BatchProcessor for Echo {
//!     type Request = String;
//!     type Response = String;
//!
//!     async fn process(
//!         &self,
//!         requests: Vec<String>,
//!     ) -> Result<Vec<String>, ProcessorError> {
//!         Ok(requests)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     microbatch::logging::init_logging()?;
//!
//!     let scheduler = Scheduler::new(
//!         SchedulerConfig {
//!             max_batch_size: 4,
//!             max_batch_delay: Duration::from_millis(50),
//!         },
//!         Echo,
//!     )?;
//!
//!     let reply = scheduler.submit("hello".to_string()).await?;
//!     println!("{reply}");
//!
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod logging;
pub mod queue;
pub mod scheduler;

// Re-export commonly used types and functions
pub use config::SchedulerConfig;
pub use errors::{ProcessorError, SchedulerError, SchedulerResult};
pub use logging::init_logging;
pub use queue::BatchedQueue;
pub use scheduler::{BatchProcessor, JobId, Scheduler};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
