//! Parallel, lane-based queue processor.
//!
//! Decouples fast ingestion from slower downstream work (persistence, event
//! publication). One bounded priority channel plus `lanes` bounded worker
//! channels; a per-lane semaphore caps how many processor calls run
//! concurrently for that lane. Channels are bounded and owned by the
//! structure; worker tasks are started in [`ParallelQueueProcessor::start`]
//! and joined in [`ParallelQueueProcessor::stop`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use r2e_core::AppError;

/// Processor function signature: consumes one item, returns an error on
/// failure. Errors are counted and logged, never retried, and never kill
/// the lane.
pub type ProcessorFn<T> =
    Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Number of worker lanes. Default: logical CPU count.
    pub lanes: usize,
    pub max_concurrent_per_lane: usize,
    pub lane_capacity: usize,
    /// Priority lane concurrency = `priority_multiplier * max_concurrent_per_lane`.
    pub priority_multiplier: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lanes: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_concurrent_per_lane: 4,
            lane_capacity: 1000,
            priority_multiplier: 2,
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub processed: u64,
    pub errors: u64,
    /// Queued-plus-in-flight workload per lane, in lane order.
    pub per_lane_workload: Vec<usize>,
    pub priority_workload: usize,
}

struct Lane<T> {
    tx: AsyncMutex<Option<mpsc::Sender<T>>>,
    rx: AsyncMutex<Option<mpsc::Receiver<T>>>,
    workload: AtomicUsize,
    semaphore: Arc<Semaphore>,
}

impl<T: Send + 'static> Lane<T> {
    fn new(capacity: usize, concurrency: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: AsyncMutex::new(Some(tx)),
            rx: AsyncMutex::new(Some(rx)),
            workload: AtomicUsize::new(0),
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    async fn send(&self, item: T) -> Result<(), AppError> {
        let sender = {
            let guard = self.tx.lock().await;
            guard.clone()
        };
        let Some(sender) = sender else {
            return Err(AppError::Cancelled);
        };
        self.workload.fetch_add(1, Ordering::SeqCst);
        if sender.send(item).await.is_err() {
            self.workload.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    async fn close(&self) {
        self.tx.lock().await.take();
    }
}

/// Lane-based worker pool consuming ingested points, generic
/// over the item type `T`.
pub struct ParallelQueueProcessor<T: Send + 'static> {
    config: QueueConfig,
    lanes: Vec<Arc<Lane<T>>>,
    priority: Arc<Lane<T>>,
    processor: ProcessorFn<T>,
    cancel: CancellationToken,
    processed: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> ParallelQueueProcessor<T> {
    pub fn new(config: QueueConfig, processor: ProcessorFn<T>) -> Self {
        let lanes = (0..config.lanes.max(1))
            .map(|_| Arc::new(Lane::new(config.lane_capacity, config.max_concurrent_per_lane)))
            .collect();
        let priority = Arc::new(Lane::new(
            config.lane_capacity,
            config.max_concurrent_per_lane * config.priority_multiplier,
        ));
        Self {
            config,
            lanes,
            priority,
            processor,
            cancel: CancellationToken::new(),
            processed: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
            handles: AsyncMutex::new(Vec::new()),
        }
    }

    /// Spawn one reader task per lane plus the priority lane. Idempotent
    /// only on first call — a second call would try to take already-taken
    /// receivers and spawn dead readers, so callers must call this once.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        for lane in self.lanes.iter().cloned() {
            handles.push(self.spawn_reader(lane));
        }
        handles.push(self.spawn_reader(self.priority.clone()));
    }

    fn spawn_reader(&self, lane: Arc<Lane<T>>) -> JoinHandle<()> {
        let processor = self.processor.clone();
        let processed = self.processed.clone();
        let errors = self.errors.clone();
        tokio::spawn(async move {
            let mut rx = lane
                .rx
                .lock()
                .await
                .take()
                .expect("lane reader started twice");
            while let Some(item) = rx.recv().await {
                let permit = lane
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("lane semaphore never closed");
                let processor = processor.clone();
                let processed = processed.clone();
                let errors = errors.clone();
                let lane = lane.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    match processor(item).await {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(AppError::Cancelled) => {}
                        Err(err) => {
                            errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(error = %err, "queue processor item failed");
                        }
                    }
                    lane.workload.fetch_sub(1, Ordering::SeqCst);
                });
            }
        })
    }

    /// Enqueue one item. Routes to the priority channel if `priority`,
    /// else to the lane with the lowest current workload. Blocks (backs
    /// off) when the target lane is full rather than dropping the item.
    pub async fn enqueue(&self, item: T, priority: bool) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if priority {
            self.priority.send(item).await
        } else {
            self.pick_lane().send(item).await
        }
    }

    /// Distribute items round-robin across lanes; priority batches go
    /// entirely to the priority channel.
    pub async fn enqueue_batch(&self, items: Vec<T>, priority: bool) -> Result<(), AppError> {
        if priority {
            for item in items {
                self.priority.send(item).await?;
            }
            return Ok(());
        }
        let n = self.lanes.len();
        for (i, item) in items.into_iter().enumerate() {
            self.lanes[i % n].send(item).await?;
        }
        Ok(())
    }

    fn pick_lane(&self) -> &Arc<Lane<T>> {
        self.lanes
            .iter()
            .min_by_key(|lane| lane.workload.load(Ordering::SeqCst))
            .expect("at least one lane")
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            per_lane_workload: self
                .lanes
                .iter()
                .map(|l| l.workload.load(Ordering::SeqCst))
                .collect(),
            priority_workload: self.priority.workload.load(Ordering::SeqCst),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Close all writers, let readers drain in-flight items, then join
    /// every reader task.
    pub async fn stop(&self) {
        self.cancel.cancel();
        for lane in &self.lanes {
            lane.close().await;
        }
        self.priority.close().await;
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration;

    fn counting_processor(
        counter: Arc<StdAtomicUsize>,
        in_flight: Arc<StdAtomicUsize>,
        peak: Arc<StdAtomicUsize>,
        delay: Duration,
    ) -> ProcessorFn<u32> {
        Arc::new(move |_item: u32| {
            let counter = counter.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn all_items_processed_with_bounded_peak_concurrency() {
        let counter = Arc::new(StdAtomicUsize::new(0));
        let in_flight = Arc::new(StdAtomicUsize::new(0));
        let peak = Arc::new(StdAtomicUsize::new(0));
        let config = QueueConfig {
            lanes: 2,
            max_concurrent_per_lane: 1,
            lane_capacity: 4,
            priority_multiplier: 2,
        };
        let processor = counting_processor(
            counter.clone(),
            in_flight.clone(),
            peak.clone(),
            Duration::from_millis(50),
        );
        let queue = Arc::new(ParallelQueueProcessor::new(config, processor));
        queue.start().await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue(1, false).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Wait for the last in-flight batch to drain.
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak in-flight should be <= lanes * max_concurrent_per_lane");
        queue.stop().await;
    }

    #[tokio::test]
    async fn priority_items_use_the_priority_lane() {
        let counter = Arc::new(StdAtomicUsize::new(0));
        let in_flight = Arc::new(StdAtomicUsize::new(0));
        let peak = Arc::new(StdAtomicUsize::new(0));
        let processor = counting_processor(counter.clone(), in_flight, peak, Duration::from_millis(1));
        let config = QueueConfig {
            lanes: 1,
            max_concurrent_per_lane: 1,
            lane_capacity: 10,
            priority_multiplier: 2,
        };
        let queue = ParallelQueueProcessor::new(config, processor);
        queue.start().await;
        queue.enqueue(1, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = queue.statistics();
        assert_eq!(stats.processed, 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn errors_are_counted_and_do_not_kill_the_lane() {
        let config = QueueConfig {
            lanes: 1,
            max_concurrent_per_lane: 1,
            lane_capacity: 4,
            priority_multiplier: 1,
        };
        let processor: ProcessorFn<u32> = Arc::new(|item: u32| {
            Box::pin(async move {
                if item == 0 {
                    Err(AppError::Store("boom".into()))
                } else {
                    Ok(())
                }
            })
        });
        let queue = ParallelQueueProcessor::new(config, processor);
        queue.start().await;
        queue.enqueue(0, false).await.unwrap();
        queue.enqueue(1, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = queue.statistics();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.processed, 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_and_joins_readers() {
        let config = QueueConfig {
            lanes: 2,
            max_concurrent_per_lane: 2,
            lane_capacity: 10,
            priority_multiplier: 2,
        };
        let counter = Arc::new(StdAtomicUsize::new(0));
        let processor: ProcessorFn<u32> = {
            let counter = counter.clone();
            Arc::new(move |_item: u32| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };
        let queue = ParallelQueueProcessor::new(config, processor);
        queue.start().await;
        for i in 0..5 {
            queue.enqueue(i, false).await.unwrap();
        }
        queue.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(queue.enqueue(99, false).await.is_err());
    }
}
