//! Consumer Pool
//!
//! A fixed set of workers that long-poll an external queue, fan each received
//! batch out to one task per item, and delete every item once its handler
//! returns, whatever the outcome.
//!
//! ## Worker lifecycle
//!
//! ```text
//!   Idle ──poll──▶ Polling ──items──▶ Processing ──batch done──▶ Idle
//!     │               │                                          │
//!     └─ stop flag ───┴── receive error ──────────▶ Stopped ◀────┘ delete error
//! ```
//!
//! The external queue is an ingress buffer, not a retry mechanism: handler
//! failures are the handler's to record. Retries of domain work live in the
//! stores the handlers write to.
//!
//! ## Example
//!
//! ```ignore
//! use consumer_pool::{ConsumerPool, PoolConfig, RedisStreamQueue, RedisQueueConfig};
//!
//! let queue = RedisStreamQueue::<MyEvent>::connect(redis, RedisQueueConfig::new("events", "workers")).await?;
//! let pool = ConsumerPool::start(Arc::new(queue), Arc::new(MyHandler), PoolConfig::new("events").with_workers(4))?;
//!
//! // later
//! let report = pool.shutdown().await;
//! ```

mod config;
mod error;
mod event;
mod handler;
mod health;
pub mod metrics;
mod pool;
mod queue;
mod redis_queue;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use event::QueueItem;
pub use handler::{HandlerContext, MessageHandler};
pub use health::{HealthState, ReadinessCheck, health_router};
pub use metrics::{PoolMetrics, init_metrics};
pub use pool::{ConsumerPool, PoolHandle, PoolReport, WorkerExit, WorkerState, WorkerSummary};
pub use queue::ExternalQueue;
pub use redis_queue::{RedisQueueConfig, RedisStreamQueue};
