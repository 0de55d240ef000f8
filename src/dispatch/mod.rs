//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! axum request
//!     → request.rs (IncomingRequest + TransportGuard)
//!     → engine.rs (mapping scan, handler invocation, redirects, errors)
//!     → response.rs (ResponseWriter → ResponseReceiver → axum response)
//! ```
//!
//! # Design Decisions
//! - The engine runs in its own task; the transport only awaits the head
//!   and streams the body, so a client disconnect never cancels a handler
//! - Per-request state lives in `context.rs` and is owned by the engine

pub(crate) mod context;
pub mod engine;
pub mod request;
pub mod response;

pub use engine::Dispatcher;
pub use request::{IncomingRequest, TransportGuard, TransportState};
pub use response::{ResponseReceiver, ResponseWriter};
