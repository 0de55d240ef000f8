//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, catch-all route)
//!     → dispatch engine (mappings, handlers)
//!     → response streamed back through the response writer
//! ```

pub mod server;

pub use server::HttpServer;
