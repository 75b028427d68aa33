//! Worker pool driving an [`ExternalQueue`] through a [`MessageHandler`]

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::event::QueueItem;
use crate::handler::{HandlerContext, MessageHandler};
use crate::metrics::PoolMetrics;
use crate::queue::ExternalQueue;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Observable state of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Polling = 1,
    Processing = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Polling,
            2 => WorkerState::Processing,
            _ => WorkerState::Stopped,
        }
    }
}

/// Why a worker left its loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The stop flag was observed between batches
    Stopped,
    /// Receive failed; the worker does not retry polling
    ReceiveFailed(String),
    /// Deleting at least one item of the last batch failed
    DeleteFailed(String),
    /// The worker task itself died
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub worker: usize,
    pub exit: WorkerExit,
    pub batches: u64,
    pub items: u64,
    pub handler_failures: u64,
}

/// Outcome of [`ConsumerPool::wait`]
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub workers: Vec<WorkerSummary>,
}

impl PoolReport {
    pub fn items(&self) -> u64 {
        self.workers.iter().map(|w| w.items).sum()
    }

    pub fn handler_failures(&self) -> u64 {
        self.workers.iter().map(|w| w.handler_failures).sum()
    }
}

/// Cloneable control/observation handle, shared with health endpoints and
/// signal handlers.
#[derive(Clone)]
pub struct PoolHandle {
    stop_tx: Arc<watch::Sender<bool>>,
    states: Arc<Vec<AtomicU8>>,
}

impl PoolHandle {
    /// Request a cooperative stop. Workers finish their in-flight batch first.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::Acquire)))
            .collect()
    }

    /// True while at least one worker has not stopped
    pub fn is_running(&self) -> bool {
        self.worker_states()
            .iter()
            .any(|s| *s != WorkerState::Stopped)
    }
}

/// A started pool of `worker_count` polling workers
pub struct ConsumerPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<WorkerSummary>>,
}

impl ConsumerPool {
    /// Launch the workers. Returns once all are spawned.
    pub fn start<E, Q, H>(queue: Arc<Q>, handler: Arc<H>, config: PoolConfig) -> PoolResult<Self>
    where
        E: Send + Sync + 'static,
        Q: ExternalQueue<E>,
        H: MessageHandler<E>,
    {
        config.validate()?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let states: Arc<Vec<AtomicU8>> = Arc::new(
            (0..config.worker_count)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
        );
        let metrics = PoolMetrics::new(config.name.clone(), handler.name());

        info!(
            pool = %config.name,
            queue = %queue.name(),
            handler = handler.name(),
            workers = config.worker_count,
            max_items = config.max_items,
            wait_ms = config.wait.as_millis() as u64,
            "Starting consumer pool"
        );

        let workers = (0..config.worker_count)
            .map(|index| {
                let worker = Worker {
                    index,
                    queue: queue.clone(),
                    handler: handler.clone(),
                    config: config.clone(),
                    states: states.clone(),
                    metrics: metrics.clone(),
                    _event: PhantomData,
                };
                tokio::spawn(worker.run(stop_rx.clone()))
            })
            .collect();

        Ok(Self {
            handle: PoolHandle {
                stop_tx: Arc::new(stop_tx),
                states,
            },
            workers,
        })
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.handle.worker_states()
    }

    /// Wait for every worker to leave its loop
    pub async fn wait(self) -> PoolReport {
        let mut report = PoolReport::default();

        for (index, worker) in self.workers.into_iter().enumerate() {
            match worker.await {
                Ok(summary) => report.workers.push(summary),
                Err(e) => {
                    error!(worker = index, error = %e, "Worker task aborted");
                    self.handle.states[index].store(WorkerState::Stopped as u8, Ordering::Release);
                    report.workers.push(WorkerSummary {
                        worker: index,
                        exit: WorkerExit::Aborted(e.to_string()),
                        batches: 0,
                        items: 0,
                        handler_failures: 0,
                    });
                }
            }
        }

        info!(
            items = report.items(),
            handler_failures = report.handler_failures(),
            "Consumer pool stopped"
        );
        report
    }

    /// [`stop`](Self::stop) followed by [`wait`](Self::wait)
    pub async fn shutdown(self) -> PoolReport {
        self.stop();
        self.wait().await
    }
}

struct Worker<E, Q, H> {
    index: usize,
    queue: Arc<Q>,
    handler: Arc<H>,
    config: PoolConfig,
    states: Arc<Vec<AtomicU8>>,
    metrics: PoolMetrics,
    _event: PhantomData<fn() -> E>,
}

/// Per-item result reported back to the batch barrier
struct ItemOutcome {
    handled: bool,
    delete_error: Option<PoolError>,
}

impl<E, Q, H> Worker<E, Q, H>
where
    E: Send + Sync + 'static,
    Q: ExternalQueue<E>,
    H: MessageHandler<E>,
{
    fn set_state(&self, state: WorkerState) {
        self.states[self.index].store(state as u8, Ordering::Release);
    }

    async fn run(self, stop_rx: watch::Receiver<bool>) -> WorkerSummary {
        let mut summary = WorkerSummary {
            worker: self.index,
            exit: WorkerExit::Stopped,
            batches: 0,
            items: 0,
            handler_failures: 0,
        };

        self.metrics.worker_started();
        debug!(worker = self.index, "Worker started");

        loop {
            if *stop_rx.borrow() {
                info!(worker = self.index, "Stop requested, worker exiting");
                break;
            }

            self.set_state(WorkerState::Polling);
            let items = match self.queue.receive(self.config.max_items, self.config.wait).await {
                Ok(items) => items,
                Err(e) => {
                    error!(worker = self.index, queue = %self.queue.name(), error = %e, "Receive failed, worker exiting");
                    self.metrics.receive_failed();
                    summary.exit = WorkerExit::ReceiveFailed(e.to_string());
                    break;
                }
            };

            if items.is_empty() {
                self.set_state(WorkerState::Idle);
                continue;
            }

            self.set_state(WorkerState::Processing);
            let count = items.len();
            let started = Instant::now();
            self.metrics.batch_received(count);

            let outcomes = self.process_batch(items).await;

            let elapsed = started.elapsed();
            self.metrics.batch_completed(elapsed);
            summary.batches += 1;
            summary.items += count as u64;
            summary.handler_failures += outcomes.iter().filter(|o| !o.handled).count() as u64;

            debug!(
                worker = self.index,
                count,
                elapsed_ms = elapsed.as_millis() as u64,
                "Processed batch"
            );

            self.set_state(WorkerState::Idle);

            if let Some(e) = outcomes.into_iter().find_map(|o| o.delete_error) {
                error!(worker = self.index, error = %e, "Delete failed, worker exiting after batch");
                summary.exit = WorkerExit::DeleteFailed(e.to_string());
                break;
            }
        }

        self.set_state(WorkerState::Stopped);
        self.metrics.worker_stopped();
        summary
    }

    /// Run one task per item and wait for all of them
    async fn process_batch(&self, items: Vec<QueueItem<E>>) -> Vec<ItemOutcome> {
        let batch_size = items.len();
        let mut join_set = JoinSet::new();

        for item in items {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let metrics = self.metrics.clone();
            let ctx = HandlerContext::for_item(self.index, batch_size, &item);
            join_set.spawn(handle_item(queue, handler, metrics, ctx, item));
        }

        let mut outcomes = Vec::with_capacity(batch_size);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // handle_item contains handler panics itself; reaching
                    // here means the runtime is shutting down.
                    error!(worker = self.index, error = %e, "Item task failed");
                    outcomes.push(ItemOutcome {
                        handled: false,
                        delete_error: None,
                    });
                }
            }
        }
        outcomes
    }
}

/// Invoke the handler in its own task so a panic is contained, then delete
/// the item exactly once.
async fn handle_item<E, Q, H>(
    queue: Arc<Q>,
    handler: Arc<H>,
    metrics: PoolMetrics,
    ctx: HandlerContext,
    item: QueueItem<E>,
) -> ItemOutcome
where
    E: Send + Sync + 'static,
    Q: ExternalQueue<E>,
    H: MessageHandler<E>,
{
    let item = Arc::new(item);
    let started = Instant::now();

    let result = {
        let item = item.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { handler.handle(&ctx, &item.event).await }).await
    };

    let handled = match result {
        Ok(Ok(())) => {
            metrics.item_handled("success", started.elapsed());
            true
        }
        Ok(Err(e)) => {
            warn!(worker = ctx.worker, handle = %ctx.handle, error = %e, "Handler failed");
            metrics.item_handled("failed", started.elapsed());
            false
        }
        Err(e) => {
            error!(worker = ctx.worker, handle = %ctx.handle, error = %e, "Handler panicked");
            metrics.item_handled("panicked", started.elapsed());
            false
        }
    };

    let delete_error = match queue.delete(&item).await {
        Ok(()) => {
            metrics.item_deleted(true);
            None
        }
        Err(e) => {
            error!(worker = ctx.worker, handle = %ctx.handle, error = %e, "Failed to delete item");
            metrics.item_deleted(false);
            Some(e)
        }
    };

    ItemOutcome {
        handled,
        delete_error,
    }
}
