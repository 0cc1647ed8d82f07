//! manager::handle
//!
//! Handle to an apply running on a background thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::ManagerError;
use crate::core::types::Revision;

type ApplyResult = Result<Revision, ManagerError>;

/// Pending result of [`ConfigManager::apply_async`](super::ConfigManager::apply_async).
///
/// Resolves to the same result the synchronous apply would have returned,
/// or [`ManagerError::Cancelled`] if [`cancel`](Self::cancel) won the race
/// against the store update.
///
/// # Example
///
/// ```
/// use gitacl::git::MemoryBackend;
/// use gitacl::manager::ConfigManager;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ConfigManager::with_backend(MemoryBackend::new());
/// let mut config = manager.get()?;
/// config.create_repository("repo1")?;
///
/// let revision = manager.apply_async(config).await?;
/// assert_eq!(manager.get()?.base_revision(), Some(&revision));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ApplyHandle {
    receiver: oneshot::Receiver<ApplyResult>,
    cancelled: Arc<AtomicBool>,
}

impl ApplyHandle {
    /// Run `work` on a new thread.
    pub(super) fn spawn<F>(work: F) -> Self
    where
        F: FnOnce(&AtomicBool) -> ApplyResult + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancelled);
        let spawned = std::thread::Builder::new()
            .name("gitacl-apply".to_string())
            .spawn(move || {
                let result = work(&flag);
                // The receiver may already be gone.
                let _ = sender.send(result);
            });
        if let Err(e) = spawned {
            tracing::error!("failed to start apply worker: {e}");
        }

        Self {
            receiver,
            cancelled,
        }
    }

    /// Ask the apply to stop.
    ///
    /// Honoured only if the store has not been updated yet; otherwise the
    /// apply completes normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Block the current thread until the apply finishes.
    ///
    /// Must not be called from within an async runtime; await the handle
    /// there instead.
    pub fn wait(self) -> ApplyResult {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(ManagerError::WorkerLost))
    }
}

impl Future for ApplyHandle {
    type Output = ApplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ManagerError::WorkerLost)))
    }
}
