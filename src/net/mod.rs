//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! protocol = "http"   → tokio TcpListener → axum::serve
//! protocol = "https"  → tls.rs (certificate + key) → axum_server::bind_rustls
//! ```

pub mod tls;
