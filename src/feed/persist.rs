//! Background write queue.
//!
//! One worker task applies writes strictly in submission order, which keeps the
//! updates for any single memory in the order the patient triggered them. A failed
//! write is retried a bounded number of times and then dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backend::{blocking, FeedStore, StoreError};
use super::policy::WriteOp;

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// A write that was given up on.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub op: WriteOp,
    pub error: String,
}

pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteOp>,
    worker: JoinHandle<()>,
}

impl WriteQueue {
    /// Start the worker. `on_failure` is called once per dropped write.
    pub fn spawn<F>(store: Arc<dyn FeedStore>, retries: u32, on_failure: F) -> Self
    where
        F: Fn(WriteFailure) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, store, retries, on_failure));
        Self { tx, worker }
    }

    /// Queue a write. Never blocks.
    pub fn submit(&self, op: WriteOp) {
        tracing::trace!(memory_id = %op.memory_id(), op = op.kind(), "write queued");
        if self.tx.send(op).is_err() {
            tracing::error!("write worker has stopped, write lost");
        }
    }

    /// Stop accepting writes and wait for everything queued to be applied.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "write worker panicked");
        }
    }
}

async fn run_worker<F>(
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    store: Arc<dyn FeedStore>,
    retries: u32,
    on_failure: F,
) where
    F: Fn(WriteFailure) + Send + 'static,
{
    while let Some(op) = rx.recv().await {
        let mut attempt = 0;
        loop {
            match apply(&store, op.clone()).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        memory_id = %op.memory_id(),
                        op = op.kind(),
                        attempt,
                        error = %e,
                        "write failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(
                        memory_id = %op.memory_id(),
                        op = op.kind(),
                        error = %e,
                        "write dropped"
                    );
                    on_failure(WriteFailure {
                        op,
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }
    }
}

async fn apply(store: &Arc<dyn FeedStore>, op: WriteOp) -> Result<(), StoreError> {
    blocking(store, move |s| match op {
        WriteOp::IncrementEngagement { memory_id } => {
            s.increment_engagement(&memory_id).map(|_| ())
        }
        WriteOp::SetCooldown { memory_id, until } => s.update_cooldown(&memory_id, until),
        WriteOp::AppendInteraction {
            memory_id,
            patient_id,
            interaction_type,
        } => s.append(&memory_id, &patient_id, interaction_type),
        WriteOp::SaveNarration {
            memory_id,
            script,
            audio_ref,
        } => s.save_narration(&memory_id, &script, &audio_ref),
    })
    .await
}
