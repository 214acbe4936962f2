//! The `PendingRequestHandle` domain object: the host-side half of `req_send_async` /
//! `pending_req_wait` / `pending_req_poll` / `async_io_select`.

use tokio::sync::oneshot;

use crate::http::body::BodyObj;
use crate::http::response::ResponseObj;

/// The outcome of a dispatched subrequest, delivered to whichever ABI call (`wait` or `poll`)
/// observes it first. Carries a raw `BodyObj` rather than a handle: the dispatch task that
/// produces this runs detached from any one instance's handle tables, so the receiving ABI call
/// (`xqd_pending_req_wait` / `_poll` / `xqd_async_io_select`) is responsible for inserting the
/// body into `InstanceState::bodies` once it observes the result.
pub type SubrequestResult = Result<(ResponseObj, BodyObj), SendError>;

/// Errors surfaced by the backend-dispatch capability, mapped to `SendErrorDetail*` tags for
/// guests using the detail-aware send variants (§4.6/§7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    #[error("unknown backend {0:?}")]
    UnknownBackend(String),
    #[error("connection to backend timed out")]
    ConnectTimeout,
    #[error("backend did not send the first byte of the response in time")]
    FirstByteTimeout,
    #[error("backend stalled between bytes of the response")]
    BetweenBytesTimeout,
    #[error("backend connection failed: {0}")]
    ConnectionFailed(String),
    #[error("backend response was invalid: {0}")]
    InvalidResponse(String),
}

/// A subrequest dispatched via `req_send_async`, not yet observed by `pending_req_wait` or
/// `pending_req_poll`.
///
/// Backed by a `tokio::sync::oneshot` channel rather than a raw `JoinHandle`: the orchestrator
/// spawns the backend dispatch as a task writing into the sender half, and the handle table
/// holds only the receiver, so polling is just `try_recv` and waiting is `.await`, mirroring the
/// single-assignment "ready" event the spec prescribes for cache transactions (§4.8) applied to
/// subrequests.
pub struct PendingRequestObj {
    receiver: oneshot::Receiver<SubrequestResult>,
}

/// The sending half handed to the task that actually talks to the backend.
pub type PendingRequestSender = oneshot::Sender<SubrequestResult>;

impl PendingRequestObj {
    pub fn channel() -> (PendingRequestSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { receiver: rx })
    }

    /// `pending_req_wait`: block until the subrequest completes.
    pub async fn wait(self) -> SubrequestResult {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(SendError::ConnectionFailed("subrequest task dropped".into())))
    }

    /// `pending_req_poll`: non-blocking; `None` means still in flight.
    pub fn poll(&mut self) -> Option<SubrequestResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SendError::ConnectionFailed(
                "subrequest task dropped".into(),
            ))),
        }
    }
}
