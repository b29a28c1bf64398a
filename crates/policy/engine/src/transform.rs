//! Bounded worker pool for user-supplied transforms.
//!
//! Heavy or untrusted transformations never run on the engine's event path:
//! they are submitted over a message channel to isolated workers and the
//! result comes back through a one-shot reply. A panicking transform is
//! reported as an error, never crashes the host, and a stuck one is cut off
//! by the submission timeout.

use policy_types::{PolicyError, PolicyResult};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

/// A transform job body: pure input → output over JSON values.
pub type TransformFn = Box<dyn FnOnce(serde_json::Value) -> Result<serde_json::Value, String> + Send>;

struct TransformJob {
    input: serde_json::Value,
    transform: TransformFn,
    reply: oneshot::Sender<Result<serde_json::Value, String>>,
}

/// Fixed-size transform worker pool.
pub struct TransformPool {
    tx: mpsc::Sender<TransformJob>,
    timeout: Duration,
}

impl TransformPool {
    pub fn new(workers: usize, queue_depth: usize, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<TransformJob>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(TransformJob {
                        input,
                        transform,
                        reply,
                    }) = job
                    else {
                        break;
                    };
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| transform(input)))
                        .unwrap_or_else(|_| {
                            tracing::warn!(worker, "Transform panicked");
                            Err("transform panicked".to_string())
                        });
                    // Submitter may have timed out and dropped the receiver
                    let _ = reply.send(result);
                }
            });
        }

        Self { tx, timeout }
    }

    /// Submit a transform and await its result.
    pub async fn submit(
        &self,
        input: serde_json::Value,
        transform: TransformFn,
    ) -> PolicyResult<serde_json::Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(TransformJob {
                input,
                transform,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PolicyError::Transform("worker pool is gone".to_string()))?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(PolicyError::Transform(message)),
            Ok(Err(_)) => Err(PolicyError::Transform("worker dropped the job".to_string())),
            Err(_) => Err(PolicyError::Transform("transform timed out".to_string())),
        }
    }
}
