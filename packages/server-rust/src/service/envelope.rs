//! Request envelopes and single-use reply handles.

use tokio::sync::oneshot;

use super::operation::{Operation, OperationResult};

/// Reply destination for one operation. Sending consumes the handle, so an
/// operation can be answered at most once.
#[derive(Debug)]
pub struct ReplyHandle {
    call_id: u64,
    tx: oneshot::Sender<OperationResult>,
}

impl ReplyHandle {
    /// Creates a handle and the receiver its reply arrives on.
    #[must_use]
    pub fn channel(call_id: u64) -> (Self, oneshot::Receiver<OperationResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { call_id, tx }, rx)
    }

    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Enqueues the reply. A receiver that has gone away is logged and
    /// otherwise ignored.
    pub fn send(self, result: OperationResult) {
        if self.tx.send(result).is_err() {
            tracing::debug!(call_id = self.call_id, "reply receiver dropped");
        }
    }
}

/// A classified operation together with where its reply goes.
#[derive(Debug)]
pub struct RequestEnvelope {
    pub operation: Operation,
    pub reply: ReplyHandle,
}

impl RequestEnvelope {
    #[must_use]
    pub fn new(operation: Operation, reply: ReplyHandle) -> Self {
        Self { operation, reply }
    }
}

/// Whether the boundary may release an envelope once `dispatch` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The reply has been sent or handed to an aggregate that owns it.
    Released,
    /// A paginated request is parked on its enumeration context and will be
    /// answered later by a provider delivery or the timeout sweep.
    Retained,
}
