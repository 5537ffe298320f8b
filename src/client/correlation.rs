//! Correlation table
//!
//! Maps each outstanding sequence id to the caller awaiting its reply.
//! Every entry completes at most once: whichever of `resolve`, `fail`,
//! the timeout timer or `drain_all` removes the entry first delivers the
//! result, and every later attempt is a no-op.
//!
//! Registration and resolution happen from different tasks (the publish
//! path and the inbound route), so the map sits behind a mutex that is
//! never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::DrainOnLoss;
use crate::protocol::envelope::ResponseEnvelope;
use crate::utils::error::RpcError;

pub type CallResult = Result<ResponseEnvelope, RpcError>;

struct PendingCall {
    issued_at: Instant,
    completion: oneshot::Sender<CallResult>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingCall>>,
}

/// The caller's side of one pending call.
///
/// Dropping the handle does not cancel the broker exchange; the entry still
/// resolves or times out and the result is discarded.
#[derive(Debug)]
pub struct PendingHandle {
    seq_id: String,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingHandle {
    pub fn seq_id(&self) -> &str {
        &self.seq_id
    }

    pub async fn wait(self) -> CallResult {
        self.rx.await.unwrap_or(Err(RpcError::Disconnected))
    }
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a pending entry and start its timeout.
    pub fn register(
        self: &Arc<Self>,
        seq_id: &str,
        timeout: Duration,
    ) -> Result<PendingHandle, RpcError> {
        let mut pending = self.lock();
        if pending.contains_key(seq_id) {
            return Err(RpcError::DuplicateSequence(seq_id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let table: Weak<Self> = Arc::downgrade(self);
        let id = seq_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                table.expire(&id, timeout);
            }
        });

        pending.insert(
            seq_id.to_string(),
            PendingCall {
                issued_at: Instant::now(),
                completion: tx,
                timer,
            },
        );
        Ok(PendingHandle {
            seq_id: seq_id.to_string(),
            rx,
        })
    }

    /// Complete `seq_id` with a reply. `false` for late or unknown ids.
    pub fn resolve(&self, seq_id: &str, envelope: ResponseEnvelope) -> bool {
        let Some(call) = self.lock().remove(seq_id) else {
            debug!(%seq_id, "discarding reply with no pending call");
            return false;
        };
        call.timer.abort();
        debug!(
            %seq_id,
            code = envelope.code,
            latency_ms = call.issued_at.elapsed().as_millis() as u64,
            "reply correlated"
        );
        let _ = call.completion.send(Ok(envelope));
        true
    }

    /// Complete `seq_id` with an error.
    pub fn fail(&self, seq_id: &str, error: RpcError) -> bool {
        let Some(call) = self.lock().remove(seq_id) else {
            return false;
        };
        call.timer.abort();
        let _ = call.completion.send(Err(error));
        true
    }

    fn expire(&self, seq_id: &str, timeout: Duration) {
        let Some(call) = self.lock().remove(seq_id) else {
            return;
        };
        debug!(%seq_id, "request timed out");
        let _ = call.completion.send(Err(RpcError::Timeout {
            seq_id: seq_id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }));
    }

    pub fn contains(&self, seq_id: &str) -> bool {
        self.lock().contains_key(seq_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl DrainOnLoss for CorrelationTable {
    fn drain_all(&self, error: RpcError) -> usize {
        let drained: Vec<PendingCall> = self.lock().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for call in drained {
            call.timer.abort();
            let _ = call.completion.send(Err(error.clone()));
        }
        count
    }
}
