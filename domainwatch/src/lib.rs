//! `DomainMonitor`: owns every other component and wires them together.

mod monitor;

pub use monitor::DomainMonitor;

use domainwatch_common::Signal;
use tokio::sync::broadcast;

/// Waits for Ctrl+C or SIGTERM, then broadcasts `Signal::Shutdown` to every
/// subscriber. Grounded on `empath::controller::shutdown`'s
/// signal-then-broadcast shape, trimmed to a single notification instead
/// of also waiting out subsystem acks, since `DomainMonitor::run` owns the
/// grace-period drain explicitly rather than via a second broadcast round.
pub async fn wait_for_shutdown(sender: broadcast::Sender<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl+c received, shutting down");
        }
        _ = terminate.recv() => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }

    let _ = sender.send(Signal::Shutdown);
    Ok(())
}
