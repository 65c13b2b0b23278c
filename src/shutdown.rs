//! Graceful shutdown plumbing, grounded on the teacher's `sig_down::SigDown`:
//! a `CancellationToken` paired with a `TaskTracker` so background pollers
//! (confirmation pollers, the reconciler's launched pollers) can be waited
//! on during shutdown instead of abandoned.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns a task listening for SIGTERM/SIGINT that cancels the shared
    /// token. Mirrors `SigDown::try_new` but returns the handle rather than
    /// a `JoinHandle`-wrapping struct, since this crate's process-level
    /// signal wiring is owned by the embedding application, not this core.
    #[cfg(unix)]
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut int = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
            token.cancel();
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawns a background poller task on the tracker, so it can be drained
    /// during shutdown via [`Shutdown::close_and_wait`].
    pub fn spawn_tracked<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Closes the tracker to new tasks and waits for all tracked pollers to
    /// finish (they should observe `cancellation_token()` and exit
    /// promptly).
    pub async fn close_and_wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_propagates_to_clones() {
        let shutdown = Shutdown::new();
        let token = shutdown.cancellation_token();
        assert!(!token.is_cancelled());
        shutdown.token.cancel();
        assert!(token.is_cancelled());
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn spawn_tracked_tasks_are_awaited_on_close() {
        let shutdown = Shutdown::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        shutdown.spawn_tracked(async move {
            let _ = tx.send(());
        });
        shutdown.close_and_wait().await;
        assert!(rx.await.is_ok());
    }
}
