//! Cancellation signal shared by the verifier's tasks
//!
//! One signal is created per run. Every task selects on `cancelled()` at its suspension
//! points and unwinds once a reason has been published.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub(crate) struct Cancellation {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl Cancellation {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes the cancellation reason. The first reason wins.
    pub(crate) fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub(crate) fn token(&self) -> CancellationToken {
        CancellationToken {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiving half held by each task.
pub(crate) struct CancellationToken {
    receiver: watch::Receiver<Option<String>>,
}

impl CancellationToken {
    /// Resolves with the cancellation reason once one is published.
    pub(crate) async fn cancelled(&mut self) -> String {
        loop {
            if let Some(reason) = self.receiver.borrow_and_update().clone() {
                return reason;
            }
            if self.receiver.changed().await.is_err() {
                return "Cancellation signal dropped".to_string();
            }
        }
    }
}
