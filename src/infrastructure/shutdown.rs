//! Graceful Shutdown Handler
//!
//! Stops the background loops (health checks, sweepers, samplers) and
//! lets in-flight proxied requests drain before the process exits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Notify;

/// Shutdown coordinator.
///
/// Tracks in-flight requests and signals shutdown to every background task.
#[derive(Clone)]
pub struct ShutdownController {
    shutdown_initiated: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
    drain_complete: Arc<Notify>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            drain_complete: Arc::new(Notify::new()),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Resolve once shutdown has been initiated, even if that happened
    /// before the call.
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Initiate graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            tracing::info!("initiating graceful shutdown");
            let _ = self.shutdown_tx.send(());
            if self.in_flight() == 0 {
                self.drain_complete.notify_waiters();
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Requests currently being proxied.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn request_started(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn request_ended(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutdown() {
            self.drain_complete.notify_waiters();
        }
    }

    /// Wait for in-flight requests to finish, up to `timeout`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let notified = self.drain_complete.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.in_flight() == 0 {
            return true;
        }

        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    "drain timeout: {} requests still in flight",
                    self.in_flight()
                );
                false
            }
        }
    }

    /// Guard counting one in-flight request until dropped.
    pub fn request_guard(&self) -> RequestGuard {
        self.request_started();
        RequestGuard {
            controller: self.clone(),
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight request.
pub struct RequestGuard {
    controller: ShutdownController,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.controller.request_ended();
    }
}

/// Resolve when SIGINT or SIGTERM arrives, then trigger shutdown.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }

    controller.shutdown();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_controller_new() {
        let controller = ShutdownController::new();
        assert!(!controller.is_shutdown());
        assert_eq!(controller.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_initiates_once() {
        let controller = ShutdownController::new();

        controller.shutdown();
        assert!(controller.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutdown());
    }

    #[test]
    fn test_request_guards() {
        let controller = ShutdownController::new();

        let guard1 = controller.request_guard();
        let guard2 = controller.request_guard();
        assert_eq!(controller.in_flight(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight(), 1);

        drop(guard2);
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_shutdown() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();

        controller.shutdown();

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_after_shutdown_resolves() {
        let controller = ShutdownController::new();
        controller.shutdown();

        let result = tokio::time::timeout(Duration::from_millis(100), controller.cancelled()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_cancelled_pending_until_shutdown() {
        let controller = ShutdownController::new();
        let mut cancelled = tokio_test::task::spawn(controller.cancelled());

        tokio_test::assert_pending!(cancelled.poll());
        controller.shutdown();
        assert!(cancelled.is_woken());
        tokio_test::assert_ready!(cancelled.poll());
    }

    #[tokio::test]
    async fn test_wait_for_drain_immediate() {
        let controller = ShutdownController::new();
        controller.shutdown();
        assert!(controller.wait_for_drain(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_wait_for_drain_with_requests() {
        let controller = ShutdownController::new();
        let guard = controller.request_guard();
        controller.shutdown();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_wait_for_drain_timeout() {
        let controller = ShutdownController::new();
        let _guard = controller.request_guard();
        controller.shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
    }

    #[test]
    fn test_clone_shares_state() {
        let controller = ShutdownController::new();
        let cloned = controller.clone();

        let _guard = controller.request_guard();
        assert_eq!(cloned.in_flight(), 1);

        cloned.shutdown();
        assert!(controller.is_shutdown());
    }
}
