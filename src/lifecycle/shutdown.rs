//! Shutdown coordination.
//!
//! Every long-running task (entrypoints, health supervisor, autoscaler,
//! reload loop) holds a receiver. Triggering is idempotent; tasks that
//! subscribe after the trigger still observe it through
//! [`Shutdown::is_triggered`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;

#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

/// How draining ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub finished: usize,
    pub aborted: usize,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!(subscribers = self.tx.receiver_count(), "Shutdown triggered");
        }
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been triggered.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        let triggered = self.triggered.clone();
        async move {
            if triggered.load(Ordering::SeqCst) {
                return;
            }
            let _ = rx.recv().await;
        }
    }

    /// Wait up to `grace` for `tasks` to finish, then abort the rest.
    pub async fn drain<T: 'static>(&self, tasks: &mut JoinSet<T>, grace: Duration) -> DrainReport {
        let mut finished = 0;
        let all_done = async {
            while tasks.join_next().await.is_some() {
                finished += 1;
            }
        };
        let timed_out = tokio::time::timeout(grace, all_done).await.is_err();

        let aborted = tasks.len();
        if timed_out {
            tracing::warn!(remaining = aborted, grace_secs = grace.as_secs(), "Grace period elapsed, aborting tasks");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        DrainReport { finished, aborted }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
