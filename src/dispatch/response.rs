//! Response writer handed to handlers, bridged to an axum response.
//!
//! # Data Flow
//! ```text
//! handler
//!     → ResponseWriter::write_head (oneshot: status + headers)
//!     → ResponseWriter::write      (mpsc: body chunks)
//!     → ResponseWriter::end        (drops the chunk sender)
//!
//! transport
//!     → ResponseReceiver::into_response awaits the head
//!     → streams chunks as the axum body
//!     → TransportGuard tracks delivery (streaming, complete)
//! ```
//!
//! # Design Decisions
//! - Writer state sits behind a std mutex, never held across an await
//! - Writing a chunk before the head sends an implicit 200
//! - `terminate` is the last resort for a response that cannot be
//!   completed normally: 500 if nothing was sent, otherwise the body is
//!   cut with an error so the client sees a truncated transfer

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use tokio::sync::{mpsc, oneshot};

use super::request::TransportGuard;
use crate::error::HandlerError;

const BODY_CHANNEL_CAPACITY: usize = 16;

type Chunk = Result<Bytes, io::Error>;

#[derive(Debug)]
struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

#[derive(Debug)]
struct WriterState {
    head_tx: Option<oneshot::Sender<Head>>,
    body_tx: Option<mpsc::Sender<Chunk>>,
    status: Option<StatusCode>,
    ended: bool,
}

/// Handle used by handlers to produce the response. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    state: Arc<Mutex<WriterState>>,
}

/// Transport end of a [`ResponseWriter`].
#[derive(Debug)]
pub struct ResponseReceiver {
    head_rx: oneshot::Receiver<Head>,
    body_rx: mpsc::Receiver<Chunk>,
}

fn broken_pipe() -> HandlerError {
    HandlerError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "client connection closed",
    ))
}

impl ResponseWriter {
    pub fn channel() -> (ResponseWriter, ResponseReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let writer = ResponseWriter {
            state: Arc::new(Mutex::new(WriterState {
                head_tx: Some(head_tx),
                body_tx: Some(body_tx),
                status: None,
                ended: false,
            })),
        };
        (writer, ResponseReceiver { head_rx, body_rx })
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_head(&self, status: StatusCode, headers: HeaderMap) -> Result<(), HandlerError> {
        let mut state = self.lock();
        Self::send_head(&mut state, status, headers)
    }

    fn send_head(
        state: &mut WriterState,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<(), HandlerError> {
        let head_tx = state.head_tx.take().ok_or(HandlerError::HeadersSent)?;
        state.status = Some(status);
        head_tx
            .send(Head { status, headers })
            .map_err(|_| broken_pipe())
    }

    /// Write a body chunk, sending a 200 head first if needed.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), HandlerError> {
        let body_tx = {
            let mut state = self.lock();
            if state.ended {
                return Err(HandlerError::Ended);
            }
            if state.head_tx.is_some() {
                Self::send_head(&mut state, StatusCode::OK, HeaderMap::new())?;
            }
            state.body_tx.clone().ok_or(HandlerError::Ended)?
        };
        body_tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| broken_pipe())
    }

    /// Finish the response. Ending twice is a no-op.
    pub async fn end(&self) -> Result<(), HandlerError> {
        let mut state = self.lock();
        if state.ended {
            return Ok(());
        }
        if state.head_tx.is_some() {
            Self::send_head(&mut state, StatusCode::OK, HeaderMap::new())?;
        }
        state.ended = true;
        state.body_tx = None;
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }

    pub fn headers_sent(&self) -> bool {
        self.lock().head_tx.is_none()
    }

    /// Status sent with the head, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    /// Force the response to an end.
    pub fn terminate(&self) {
        let mut state = self.lock();
        if state.ended {
            return;
        }
        if state.head_tx.is_some() {
            let _ = Self::send_head(&mut state, StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new());
        } else if let Some(body_tx) = &state.body_tx {
            let _ = body_tx.try_send(Err(io::Error::other("response terminated")));
        }
        state.ended = true;
        state.body_tx = None;
    }
}

impl ResponseReceiver {
    /// Wait for the head, then stream the body.
    ///
    /// The guard moves into the body stream so that dropping the response
    /// (client gone) is reported back to the request.
    pub async fn into_response(self, guard: TransportGuard) -> Response {
        let Ok(head) = self.head_rx.await else {
            guard.mark_complete();
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };
        guard.mark_streaming();

        // The guard is the first field so that it reports the close before
        // the body channel shuts and writers start failing.
        let chunks = stream::unfold((guard, self.body_rx), |(guard, mut body_rx)| async move {
            match body_rx.recv().await {
                Some(chunk) => Some((chunk, (guard, body_rx))),
                None => {
                    guard.mark_complete();
                    None
                }
            }
        });

        let mut response = Response::new(Body::from_stream(chunks));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}
