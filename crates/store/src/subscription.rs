//! Ingestion of "refresh token created" events published by other services.

use crate::repository::RefreshTokenRepository;
use refresh_flow_types::{RefreshError, WorkerPool};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running event consumer.
///
/// Each received event is handed to the ingestion pool without waiting for
/// the store write, so a slow backend never stalls delivery.
pub struct EventSubscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Starts consuming `events` on a dedicated task.
    #[must_use]
    pub fn start(
        store: Arc<RefreshTokenRepository>,
        mut events: mpsc::Receiver<Value>,
        pool: WorkerPool,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tracing::info!(pool = pool.name(), workers = pool.size(), "event subscription started");
            loop {
                let event = tokio::select! {
                    () = token.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let store = Arc::clone(&store);
                pool.spawn(async move {
                    match store.ingest(&event).await {
                        Ok(()) => {}
                        Err(RefreshError::MalformedEvent(reason)) => {
                            tracing::warn!(%reason, "dropping malformed refresh token event");
                        }
                        Err(e) => tracing::error!(error = %e, "failed to store refresh token event"),
                    }
                });
            }
            tracing::info!("event subscription stopped");
        });
        Self { cancel, task }
    }

    /// Whether the consumer has exited (stopped or the feed closed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops consuming and waits for the consumer to exit.
    ///
    /// Writes already handed to the pool still complete.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "event subscription task failed");
        }
    }
}
