//! Shared test utilities
//!
//! - `TestDatabase`: PostgreSQL container with the workspace migrations applied (feature: "postgres")
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: deterministic recipients and ids derived from the test name
//!
//! Container-backed tests need Docker and are marked `#[ignore = "Requires Docker"]`:
//!
//! ```bash
//! cargo test -- --ignored
//! ```
//!
//! ```rust,no_run
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! #[ignore = "Requires Docker"]
//! async fn my_postgres_test() {
//!     let db = TestDatabase::new().await;
//!     let data = TestDataBuilder::from_test_name("my_postgres_test");
//!
//!     let correlation_id = data.correlation_id();
//!     let to = data.email("client");
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic values
///
/// Parallel tests sharing a database stay apart by deriving everything from
/// the test name.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (seed is the hash of the name)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let data = TestDataBuilder::from_test_name("test_claim_batch");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Correlation id shared by every notification a test creates
    pub fn correlation_id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let data = TestDataBuilder::new(7);
    /// assert_eq!(data.email("client"), "client-7@test.local");
    /// ```
    pub fn email(&self, who: &str) -> String {
        format!("{}-{}@test.local", who, self.seed)
    }

    /// E.164-shaped number, stable per seed and index
    pub fn phone(&self, index: u8) -> String {
        format!("+1555{:04}{:03}", self.seed % 10_000, index)
    }
}
