//! Consumer pool behaviour against an in-memory queue

use async_trait::async_trait;
use consumer_pool::{
    ConsumerPool, ExternalQueue, HandlerContext, MessageHandler, PoolConfig, PoolError, PoolResult,
    QueueItem, WorkerExit, WorkerState,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Event {
    n: u32,
}

/// Queue that hands items out once and counts deletes per handle
#[derive(Default)]
struct MemoryQueue {
    ready: Mutex<VecDeque<QueueItem<Event>>>,
    deletes: Mutex<HashMap<String, u32>>,
    failing_receives: AtomicUsize,
    failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryQueue {
    fn with_events(range: std::ops::Range<u32>) -> Self {
        let queue = Self::default();
        for n in range {
            queue.push(n);
        }
        queue
    }

    fn push(&self, n: u32) {
        self.ready
            .lock()
            .unwrap()
            .push_back(QueueItem::new(format!("msg-{}", n), Event { n }));
    }

    fn fail_next_receives(&self, count: usize) {
        self.failing_receives.store(count, Ordering::SeqCst);
    }

    fn fail_delete_of(&self, handle: &str) {
        self.failing_deletes.lock().unwrap().insert(handle.to_string());
    }

    fn delete_counts(&self) -> HashMap<String, u32> {
        self.deletes.lock().unwrap().clone()
    }

    fn deleted(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }
}

#[async_trait]
impl ExternalQueue<Event> for MemoryQueue {
    async fn receive(&self, max_items: usize, wait: Duration) -> PoolResult<Vec<QueueItem<Event>>> {
        let failing = self
            .failing_receives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(PoolError::queue("connection reset"));
        }

        let batch: Vec<_> = {
            let mut ready = self.ready.lock().unwrap();
            let take = max_items.min(ready.len());
            ready.drain(..take).collect()
        };

        if batch.is_empty() {
            tokio::time::sleep(wait).await;
        }
        Ok(batch)
    }

    async fn delete(&self, item: &QueueItem<Event>) -> PoolResult<()> {
        *self
            .deletes
            .lock()
            .unwrap()
            .entry(item.handle.clone())
            .or_insert(0) += 1;

        if self.failing_deletes.lock().unwrap().contains(&item.handle) {
            return Err(PoolError::queue("delete rejected"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Fails every third event and panics on event 7
#[derive(Default)]
struct FlakyHandler {
    seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl MessageHandler<Event> for FlakyHandler {
    async fn handle(&self, _ctx: &HandlerContext, event: &Event) -> PoolResult<()> {
        self.seen.lock().unwrap().push(event.n);
        if event.n == 7 {
            panic!("handler bug on 7");
        }
        if event.n % 3 == 0 {
            return Err(PoolError::handler(format!("cannot process {}", event.n)));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

fn fast_config() -> PoolConfig {
    PoolConfig::new("test").with_wait(Duration::from_millis(10))
}

async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) {
    tokio::time::timeout(timeout, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_item_deleted_exactly_once_regardless_of_outcome() {
    let queue = Arc::new(MemoryQueue::with_events(0..25));
    let handler = Arc::new(FlakyHandler::default());

    let pool = ConsumerPool::start(
        queue.clone(),
        handler.clone(),
        fast_config().with_workers(5).with_max_items(10),
    )
    .unwrap();

    wait_until(Duration::from_secs(5), || queue.deleted() == 25).await;
    let report = pool.shutdown().await;

    let counts = queue.delete_counts();
    assert_eq!(counts.len(), 25);
    assert!(counts.values().all(|&c| c == 1), "double delete: {:?}", counts);

    let mut seen = handler.seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..25).collect::<Vec<_>>());

    assert_eq!(report.items(), 25);
    // 0,3,6,...,24 fail (9 items) and 7 panics
    assert_eq!(report.handler_failures(), 10);
    assert!(report.workers.iter().all(|w| w.exit == WorkerExit::Stopped));
}

/// Completes only once all `n` items of a batch are inside the handler together
struct RendezvousHandler {
    barrier: Barrier,
    completed: AtomicUsize,
}

#[async_trait]
impl MessageHandler<Event> for RendezvousHandler {
    async fn handle(&self, ctx: &HandlerContext, _event: &Event) -> PoolResult<()> {
        assert_eq!(ctx.batch_size, 3);
        self.barrier.wait().await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rendezvous"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_items_in_a_batch_run_concurrently() {
    let queue = Arc::new(MemoryQueue::with_events(0..3));
    let handler = Arc::new(RendezvousHandler {
        barrier: Barrier::new(3),
        completed: AtomicUsize::new(0),
    });

    let pool = ConsumerPool::start(queue.clone(), handler.clone(), fast_config()).unwrap();

    wait_until(Duration::from_secs(2), || handler.completed.load(Ordering::SeqCst) == 3).await;
    pool.shutdown().await;
    assert_eq!(queue.deleted(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_failure_and_panic_do_not_affect_siblings() {
    // 6 fails, 7 panics, 8 succeeds; all arrive in one batch
    let queue = Arc::new(MemoryQueue::with_events(6..9));
    let handler = Arc::new(FlakyHandler::default());

    let pool = ConsumerPool::start(queue.clone(), handler.clone(), fast_config()).unwrap();

    wait_until(Duration::from_secs(2), || queue.deleted() == 3).await;
    let report = pool.shutdown().await;

    assert_eq!(queue.delete_counts().get("msg-7"), Some(&1));
    assert_eq!(report.workers[0].batches, 1);
    assert_eq!(report.handler_failures(), 2);
    assert_eq!(report.workers[0].exit, WorkerExit::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_receive_error_stops_only_the_failing_worker() {
    let queue = Arc::new(MemoryQueue::default());
    queue.fail_next_receives(1);
    let handler = Arc::new(FlakyHandler::default());

    let pool = ConsumerPool::start(queue.clone(), handler, fast_config().with_workers(2)).unwrap();

    wait_until(Duration::from_secs(2), || {
        pool.worker_states().contains(&WorkerState::Stopped)
    })
    .await;

    // The surviving worker keeps draining
    queue.push(1);
    queue.push(2);
    wait_until(Duration::from_secs(2), || queue.deleted() == 2).await;

    let report = pool.shutdown().await;
    let failed = report
        .workers
        .iter()
        .filter(|w| matches!(w.exit, WorkerExit::ReceiveFailed(_)))
        .count();
    assert_eq!(failed, 1);
    assert_eq!(report.items(), 2);
}

struct SlowHandler {
    started: AtomicUsize,
    finished: AtomicUsize,
}

#[async_trait]
impl MessageHandler<Event> for SlowHandler {
    async fn handle(&self, _ctx: &HandlerContext, _event: &Event) -> PoolResult<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_lets_in_flight_batch_finish() {
    let queue = Arc::new(MemoryQueue::with_events(0..4));
    let handler = Arc::new(SlowHandler {
        started: AtomicUsize::new(0),
        finished: AtomicUsize::new(0),
    });

    let pool = ConsumerPool::start(queue.clone(), handler.clone(), fast_config()).unwrap();

    wait_until(Duration::from_secs(2), || handler.started.load(Ordering::SeqCst) == 4).await;
    let report = pool.shutdown().await;

    assert_eq!(handler.finished.load(Ordering::SeqCst), 4);
    assert_eq!(queue.deleted(), 4);
    assert_eq!(report.workers[0].exit, WorkerExit::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_failure_ends_worker_after_batch() {
    let queue = Arc::new(MemoryQueue::with_events(1..3));
    queue.fail_delete_of("msg-1");
    let handler = Arc::new(FlakyHandler::default());

    let pool = ConsumerPool::start(queue.clone(), handler, fast_config()).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(2), pool.wait())
        .await
        .expect("worker should exit on its own");

    let counts = queue.delete_counts();
    assert_eq!(counts.get("msg-1"), Some(&1));
    assert_eq!(counts.get("msg-2"), Some(&1));
    assert!(matches!(report.workers[0].exit, WorkerExit::DeleteFailed(_)));
}

#[tokio::test]
async fn test_states_after_shutdown() {
    let queue = Arc::new(MemoryQueue::default());
    let pool = ConsumerPool::start(
        queue,
        Arc::new(FlakyHandler::default()),
        fast_config().with_workers(3),
    )
    .unwrap();
    let handle = pool.handle();
    assert!(handle.is_running());

    pool.shutdown().await;

    assert!(!handle.is_running());
    assert!(handle.stop_requested());
    assert_eq!(handle.worker_states(), vec![WorkerState::Stopped; 3]);
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let result = ConsumerPool::start(
        Arc::new(MemoryQueue::default()),
        Arc::new(FlakyHandler::default()),
        fast_config().with_workers(0),
    );
    assert!(matches!(result, Err(PoolError::Config(_))));
}
