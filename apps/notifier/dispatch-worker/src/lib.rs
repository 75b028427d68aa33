//! Notifier Dispatch Worker
//!
//! Hosts the outbox sweep and the inbound reply relay in one process.
//!
//! ## Architecture
//!
//! ```text
//! cron tick ──► ClaimSweep ──► claim_batch (Postgres, one txn)
//!                   │
//!                   ▼
//!              Dispatcher ──► SMTP / SendGrid, HTTP SMS ──► mark_channel_done
//!
//! Redis Stream (mail:inbound)
//!   ↓ (Consumer Group: notifier)
//! ConsumerPool<InboundMailEvent, InboundMailHandler>
//!   ↓ (verify reply token, enqueue relay)
//! Outbox
//! ```
//!
//! The admin listener serves `/health`, `/ready`, `/metrics` and the
//! `/admin/outbox/*` operator endpoints.

pub mod admin;
pub mod checks;
pub mod config;

use axum::Router;
use consumer_pool::{ConsumerPool, HealthState, RedisStreamQueue, health_router};
use core_config::{Environment, FromEnv, app_info};
use database::{postgres::PostgresConfig, redis::RedisConfig};
use domain_notifications::providers::{
    HttpSmsConfig, HttpSmsProvider, SendGridConfig, SendGridProvider, SmtpConfig, SmtpProvider,
};
use domain_notifications::{
    ClaimSweep, DisabledSender, Dispatcher, EmailSender, InboundMailEvent, InboundMailHandler,
    OutboxStore, PgOutboxStore, ReplyTokenSigner, SmsSender,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::admin::{AdminState, admin_router};
use crate::checks::{PostgresCheck, RedisCheck};
use crate::config::{EmailProviderKind, NotifierConfig, SmsProviderKind};

/// How often the main loop checks whether the consumer pool is still alive
const POOL_WATCH_INTERVAL: Duration = Duration::from_secs(5);

fn email_sender(kind: EmailProviderKind) -> Result<Arc<dyn EmailSender>> {
    let sender: Arc<dyn EmailSender> = match kind {
        EmailProviderKind::Smtp => {
            let config = SmtpConfig::from_env().wrap_err("Failed to load SMTP configuration")?;
            Arc::new(SmtpProvider::new(config)?)
        }
        EmailProviderKind::SendGrid => {
            let config =
                SendGridConfig::from_env().wrap_err("Failed to load SendGrid configuration")?;
            Arc::new(SendGridProvider::new(config))
        }
        EmailProviderKind::Disabled => {
            warn!("Email provider disabled, email channels will complete without sending");
            Arc::new(DisabledSender)
        }
    };
    info!(provider = sender.name(), "Email provider ready");
    Ok(sender)
}

fn sms_sender(kind: SmsProviderKind) -> Result<Arc<dyn SmsSender>> {
    let sender: Arc<dyn SmsSender> = match kind {
        SmsProviderKind::Http => {
            let config = HttpSmsConfig::from_env().wrap_err("Failed to load SMS configuration")?;
            Arc::new(HttpSmsProvider::new(config)?)
        }
        SmsProviderKind::Disabled => {
            warn!("SMS provider disabled, SMS channels will complete without sending");
            Arc::new(DisabledSender)
        }
    };
    info!(provider = sender.name(), "SMS provider ready");
    Ok(sender)
}

/// Admin routes merged with the pool's health, readiness and metrics routes
pub fn build_router(store: Arc<dyn OutboxStore>, health_state: HealthState) -> Router {
    admin_router(AdminState::new(store))
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
}

/// Serve health, metrics and admin routes until `shutdown` flips
async fn start_admin_server(
    app: Router,
    address: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind admin server to {}", address))?;

    info!(address = %address, "Health and admin server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("Admin server failed")?;

    Ok(())
}

/// Run the dispatch worker
///
/// 1. Sets up structured logging and the Prometheus recorder
/// 2. Connects to PostgreSQL and applies migrations
/// 3. Connects to Redis for the inbound mail stream
/// 4. Schedules the outbox sweep and starts the consumer pool
/// 5. Serves health and admin endpoints until SIGINT/SIGTERM or the pool dies
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    if let Err(e) = consumer_pool::init_metrics() {
        warn!(error = %e, "Prometheus recorder not installed");
    }

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting dispatch worker");
    info!("Environment: {:?}", environment);

    let config = NotifierConfig::from_env().wrap_err("Failed to load notifier configuration")?;

    let pg_config = PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
    let db = database::postgres::connect_with_retry(pg_config, None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    database::postgres::run_migrations::<migration::Migrator>(&db, &app_info.name)
        .await
        .wrap_err("Failed to apply migrations")?;

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let redis = database::redis::connect_with_retry(redis_config.clone(), None)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let store: Arc<dyn OutboxStore> = Arc::new(PgOutboxStore::new(db.clone()));
    let tokens = Arc::new(ReplyTokenSigner::new(
        &config.reply_token_secret,
        config.reply_token_ttl_days,
        &config.reply_address,
    )?);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        email_sender(config.email_provider)?,
        sms_sender(config.sms_provider)?,
        tokens.clone(),
        config.dispatcher.clone(),
    ));

    let sweep = Arc::new(ClaimSweep::new(store.clone(), dispatcher, config.sweep.clone()));
    let mut scheduler = sweep
        .start(&config.sweep_cron)
        .await
        .wrap_err("Failed to schedule outbox sweep")?;

    let client = redis::Client::open(redis_config.url.as_str()).wrap_err("Invalid Redis URL")?;
    let queue = Arc::new(
        RedisStreamQueue::<InboundMailEvent>::connect(client, config.queue.redis_config())
            .await
            .wrap_err("Failed to open inbound mail stream")?,
    );
    let handler = Arc::new(InboundMailHandler::new(store.clone(), tokens));
    let pool = ConsumerPool::start(queue, handler, config.queue.pool_config())
        .wrap_err("Failed to start consumer pool")?;
    let pool_handle = pool.handle();

    let health_state = HealthState::new(app_info.name, app_info.version, pool_handle.clone())
        .with_check(Arc::new(PostgresCheck::new(db)))
        .with_check(Arc::new(RedisCheck::new(redis)));
    let app = build_router(store, health_state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let address = config.server.address();
    let server = tokio::spawn(async move {
        if let Err(e) = start_admin_server(app, address, shutdown_rx).await {
            error!(error = %e, "Admin server failed");
        }
    });

    tokio::select! {
        result = shutdown_signal() => {
            if let Err(e) = result {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }
        _ = pool_stopped(&pool_handle) => {
            error!("All consumer pool workers stopped, shutting down");
        }
    }

    let report = pool.shutdown().await;
    info!(
        items = report.items(),
        handler_failures = report.handler_failures(),
        "Inbound relay stopped"
    );

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Outbox sweep scheduler did not shut down cleanly");
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = server.await {
        warn!(error = %e, "Admin server task aborted");
    }

    info!("Dispatch worker stopped");
    Ok(())
}

async fn pool_stopped(handle: &consumer_pool::PoolHandle) {
    let mut interval = tokio::time::interval(POOL_WATCH_INTERVAL);
    loop {
        interval.tick().await;
        if !handle.is_running() {
            return;
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .wrap_err("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.wrap_err("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
