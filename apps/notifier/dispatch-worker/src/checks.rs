//! Readiness checks for the stores the worker depends on

use async_trait::async_trait;
use consumer_pool::ReadinessCheck;
use redis::aio::ConnectionManager;
use sea_orm::DatabaseConnection;

pub struct PostgresCheck {
    db: DatabaseConnection,
}

impl PostgresCheck {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReadinessCheck for PostgresCheck {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> Result<(), String> {
        database::postgres::ping(&self.db)
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct RedisCheck {
    redis: ConnectionManager,
}

impl RedisCheck {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ReadinessCheck for RedisCheck {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> Result<(), String> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
