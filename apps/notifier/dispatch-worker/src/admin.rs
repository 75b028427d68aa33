//! Operator endpoints for the outbox.
//!
//! - `GET  /admin/outbox/{id}`: current record with per-channel state
//! - `POST /admin/outbox/{id}/requeue/{channel}`: put one claimed channel back to pending
//! - `POST /admin/outbox/requeue-stale?older_than_secs=N`: reclaim every channel
//!   claimed more than `N` seconds ago

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{TimeDelta, Utc};
use domain_notifications::{Channel, NotificationError, NotificationRecord, OutboxStore};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Claims younger than this are never reclaimed by the stale endpoint
pub const DEFAULT_STALE_AFTER_SECS: i64 = 600;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn OutboxStore>,
}

impl AdminState {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug)]
pub enum AdminError {
    BadRequest(String),
    Notification(NotificationError),
}

impl From<NotificationError> for AdminError {
    fn from(e: NotificationError) -> Self {
        Self::Notification(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AdminError::Notification(e) => {
                let status = match &e {
                    NotificationError::NotFound(_) => StatusCode::NOT_FOUND,
                    NotificationError::InvalidTransition(_) => StatusCode::CONFLICT,
                    NotificationError::Validation(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(error = %e, "Admin request failed");
                } else {
                    warn!(error = %e, "Admin request rejected");
                }
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn get_record(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRecord>, AdminError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or(AdminError::Notification(NotificationError::NotFound(id)))
}

async fn requeue_channel(
    State(state): State<AdminState>,
    Path((id, channel)): Path<(Uuid, String)>,
) -> Result<StatusCode, AdminError> {
    let channel: Channel = channel
        .parse()
        .map_err(|_| AdminError::BadRequest(format!("unknown channel '{}'", channel)))?;

    state.store.requeue_channel(id, channel).await?;
    info!(id = %id, channel = %channel, "Channel requeued by operator");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct StaleQuery {
    older_than_secs: Option<i64>,
}

async fn requeue_stale(
    State(state): State<AdminState>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let older_than = query.older_than_secs.unwrap_or(DEFAULT_STALE_AFTER_SECS);
    if older_than < 0 {
        return Err(AdminError::BadRequest(
            "older_than_secs must not be negative".to_string(),
        ));
    }

    let cutoff = TimeDelta::try_seconds(older_than)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| {
            AdminError::BadRequest(format!("older_than_secs {} is out of range", older_than))
        })?;
    let requeued = state.store.requeue_stale(cutoff).await?;
    info!(requeued, older_than_secs = older_than, "Stale claims requeued by operator");
    Ok(Json(json!({ "requeued": requeued })))
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/outbox/requeue-stale", post(requeue_stale))
        .route("/admin/outbox/{id}", get(get_record))
        .route("/admin/outbox/{id}/requeue/{channel}", post(requeue_channel))
        .with_state(state)
}
