//! Notifier Dispatch Worker - Entry Point
//!
//! Sweeps the notification outbox on a schedule and relays inbound replies.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    core_config::tracing::install_color_eyre();
    notifier_dispatch_worker::run().await
}
