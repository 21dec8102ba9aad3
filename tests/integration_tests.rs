//! End-to-end tests for the microbatch scheduler

use async_trait::async_trait;
use microbatch::*;
use tokio_test::assert_ok;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Stand-in for a batch-oriented chat backend: answers every prompt and
/// records the shape of each batch it was handed.
struct ChatBackend {
    batch_sizes: Mutex<Vec<usize>>,
    calls: AtomicUsize,
}

impl ChatBackend {
    fn new() -> Self {
        Self {
            batch_sizes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn recorded_batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BatchProcessor for ChatBackend {
    type Request = String;
    type Response = String;

    async fn process(&self, requests: Vec<String>) -> Result<Vec<String>, ProcessorError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.batch_sizes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(requests.len());
        // Slow, remote-ish call; order-preserving per the contract.
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(requests
            .into_iter()
            .map(|prompt| format!("reply to: {prompt}"))
            .collect())
    }
}

mod scheduler_e2e {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_each_receive_their_own_reply() {
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_batch_size: 4,
                max_batch_delay: Duration::from_millis(100),
            },
            ChatBackend::new(),
        )
        .unwrap();

        let names = [
            "Luke", "Leia", "Han", "Chewbacca", "Obi-Wan", "Yoda", "R2D2", "C3PO",
        ];
        let tasks = names.iter().map(|name| {
            let scheduler = scheduler.clone();
            let prompt = format!("Hello, I am {name}.");
            tokio::spawn(async move { scheduler.submit(prompt).await })
        });

        let replies = futures_util::future::join_all(tasks).await;
        for (name, reply) in names.iter().zip(replies) {
            assert_eq!(
                reply.unwrap().unwrap(),
                format!("reply to: Hello, I am {name}.")
            );
        }
        assert_eq!(scheduler.pending_jobs(), 0);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn batches_never_exceed_the_configured_size() {
        let backend = Arc::new(ChatBackend::new());
        let backend_view = Arc::clone(&backend);
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_batch_size: 3,
                max_batch_delay: Duration::from_millis(100),
            },
            SharedBackend(backend),
        )
        .unwrap();

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.submit(format!("prompt {i}")).await })
            })
            .collect();
        for task in tasks {
            tokio_test::assert_ok!(task.await.unwrap());
        }

        let sizes = backend_view.recorded_batch_sizes();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert!(sizes.iter().all(|&size| size >= 1 && size <= 3));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lone_request_is_released_by_the_timeout() {
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_batch_size: 8,
                max_batch_delay: Duration::from_millis(100),
            },
            ChatBackend::new(),
        )
        .unwrap();

        let start = tokio::time::Instant::now();
        let reply = scheduler.submit("just me".to_string()).await.unwrap();
        assert_eq!(reply, "reply to: just me");
        // 100ms linger plus the backend's 30ms processing time.
        assert_eq!(start.elapsed(), Duration::from_millis(130));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_leaves_no_caller_hanging() {
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_batch_size: 32,
                max_batch_delay: Duration::from_secs(3600),
            },
            ChatBackend::new(),
        )
        .unwrap();

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.submit(format!("stuck {i}")).await })
            })
            .collect();
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        scheduler.shutdown().await;
        for task in tasks {
            assert_eq!(task.await.unwrap(), Err(SchedulerError::Shutdown));
        }
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    /// Processor wrapper sharing one backend between the scheduler and the
    /// test's assertions.
    struct SharedBackend(Arc<ChatBackend>);

    #[async_trait]
    impl BatchProcessor for SharedBackend {
        type Request = String;
        type Response = String;

        async fn process(&self, requests: Vec<String>) -> Result<Vec<String>, ProcessorError> {
            self.0.process(requests).await
        }
    }
}

mod queue_e2e {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn producers_on_many_tasks_never_lose_items() {
        let queue = BatchedQueue::new(7, Duration::from_millis(20)).unwrap();

        let producers: Vec<_> = (0..10u32)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..10u32 {
                        queue.add(p * 100 + i).await;
                    }
                })
            })
            .collect();

        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move {
                let mut seen = Vec::new();
                while seen.len() < 100 {
                    let batch = queue.retrieve().await;
                    assert!(!batch.is_empty());
                    assert!(batch.len() <= 7);
                    seen.extend(batch);
                }
                seen
            }
        });

        for producer in producers {
            producer.await.unwrap();
        }
        let mut seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 100);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 100);
    }
}
