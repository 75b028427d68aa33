//! Connection helpers for the stores the notifier depends on.
//!
//! # Features
//!
//! - `postgres` (default) - sea-orm connection pool + migration runner for the outbox
//! - `redis` (default) - `ConnectionManager` for the inbound event stream
//! - `config` (default) - `core_config::FromEnv` implementations
//!
//! ```ignore
//! use database::postgres::{self, PostgresConfig};
//! use core_config::FromEnv;
//!
//! let db = postgres::connect_with_retry(PostgresConfig::from_env()?, None).await?;
//! postgres::run_migrations::<migration::Migrator>(&db, "notifier").await?;
//! ```

pub mod error;
pub mod retry;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

pub use error::{DatabaseError, DatabaseResult};
pub use retry::{RetryConfig, retry_with_backoff};
