//! Prometheus metrics for consumer pools

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global Prometheus recorder.
///
/// Call once at startup; later calls return without reinstalling.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

/// Render the exposition text, empty if metrics were never initialized
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

/// Labelled recorder for one pool
#[derive(Clone)]
pub struct PoolMetrics {
    queue: String,
    handler: String,
}

impl PoolMetrics {
    pub fn new(queue: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            handler: handler.into(),
        }
    }

    pub fn batch_received(&self, count: usize) {
        histogram!("consumer_pool_batch_size", "queue" => self.queue.clone())
            .record(count as f64);
    }

    pub fn batch_completed(&self, elapsed: Duration) {
        histogram!(
            "consumer_pool_batch_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(elapsed.as_secs_f64());
    }

    /// `status` is one of "success", "failed", "panicked"
    pub fn item_handled(&self, status: &'static str, elapsed: Duration) {
        counter!(
            "consumer_pool_items_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "status" => status
        )
        .increment(1);

        histogram!(
            "consumer_pool_item_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn item_deleted(&self, ok: bool) {
        counter!(
            "consumer_pool_deletes_total",
            "queue" => self.queue.clone(),
            "status" => if ok { "success" } else { "failed" }
        )
        .increment(1);
    }

    pub fn receive_failed(&self) {
        counter!("consumer_pool_receive_errors_total", "queue" => self.queue.clone()).increment(1);
    }

    pub fn worker_started(&self) {
        gauge!("consumer_pool_workers_running", "queue" => self.queue.clone()).increment(1.0);
    }

    pub fn worker_stopped(&self) {
        gauge!("consumer_pool_workers_running", "queue" => self.queue.clone()).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_init_is_empty() {
        if PROMETHEUS_HANDLE.get().is_none() {
            assert!(render_metrics().is_empty());
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = PoolMetrics::new("inbound", "relay");
        metrics.batch_received(3);
        metrics.item_handled("success", Duration::from_millis(5));
        metrics.item_deleted(true);
        metrics.worker_started();
        metrics.worker_stopped();
        assert_eq!(metrics.queue, "inbound");
        assert_eq!(metrics.handler, "relay");
    }
}
