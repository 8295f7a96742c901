//! Graceful shutdown coordination for the adapter.
//!
//! Every definition submission registers itself as an in-flight operation.
//! Once shutdown starts, new submissions are refused and the controller waits
//! (up to a grace period) for the running ones to finish before the watches
//! are torn down.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use apigw_sync::shutdown::ShutdownController;
//!
//! # async fn example() {
//! let controller = ShutdownController::new();
//! let signal = controller.shutdown_signal();
//!
//! {
//!     let _op = controller.register_operation();
//!     assert_eq!(controller.active_operations(), 1);
//! }
//!
//! assert!(controller.shutdown(Duration::from_secs(1)).await);
//! signal.wait().await;
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Coordinates shutdown between the orchestrator and its callers.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    initiated: AtomicBool,
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    active_ops: AtomicUsize,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    /// Create a controller with no operations in flight.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownInner {
                initiated: AtomicBool::new(false),
                tx,
                rx,
                active_ops: AtomicUsize::new(0),
            }),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.rx.clone()
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.inner.initiated.load(Ordering::SeqCst)
    }

    /// Get a future that resolves when shutdown is initiated.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.rx.clone(),
        }
    }

    /// Initiate shutdown and wait for in-flight operations.
    ///
    /// Returns `true` if every operation finished within `grace_period`.
    /// Calling it again after the first time returns `true` immediately.
    pub async fn shutdown(&self, grace_period: Duration) -> bool {
        if self
            .inner
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }

        info!(grace_period = ?grace_period, "initiating graceful shutdown");
        let _ = self.inner.tx.send(true);

        match timeout(grace_period, self.wait_for_completion()).await {
            Ok(()) => {
                info!("in-flight operations drained");
                true
            }
            Err(_) => {
                warn!(
                    remaining_ops = self.active_operations(),
                    "grace period elapsed with operations still running"
                );
                false
            }
        }
    }

    async fn wait_for_completion(&self) {
        while self.active_operations() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Register an in-flight operation.
    ///
    /// The operation counts until the returned guard is dropped.
    pub fn register_operation(&self) -> OperationGuard {
        self.inner.active_ops.fetch_add(1, Ordering::SeqCst);
        OperationGuard {
            controller: self.clone(),
        }
    }

    /// Number of operations in flight.
    pub fn active_operations(&self) -> usize {
        self.inner.active_ops.load(Ordering::SeqCst)
    }
}

/// Guard for an in-flight operation.
#[derive(Debug)]
pub struct OperationGuard {
    controller: ShutdownController,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.controller
            .inner
            .active_ops
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// Future that resolves when shutdown is initiated.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn wait(mut self) {
        // A closed channel means the controller is gone; treat it as shutdown.
        let _ = self.rx.wait_for(|initiated| *initiated).await;
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C elsewhere).
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
