//! reserve: a request-mapping HTTP server.
//!
//! Requests are matched, in order, against a list of mappings (regular
//! expression, method filter, optional predicate). Each mapping is bound to
//! a handler that serves a file, proxies a URL, writes a status or runs
//! custom code. Handlers may redirect internally to another URL or status;
//! the chain is bounded by `max-redirect`.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ dispatch::engine ──▶ mapping::matcher
//!                                           │                      │
//!                                           │                      ▼
//!                                           │               handlers::{custom,
//!                                           │                 file, status, url}
//!                                           │                      │
//!                                           ◀──── Outcome ─────────┘
//!                                           │
//!     Client Response                       ▼
//!     ◀────────────── dispatch::response ◀──┘
//!
//!     Cross-cutting:
//!       registry  (in-flight requests, holding protocol for set_mappings)
//!       events    (created, ready, incoming, redirecting, redirected, ...)
//!       config    (settings, checked mapping table, hot reload)
//!       observability, lifecycle, net (TLS)
//! ```

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod mapping;
pub mod registry;

// Transport
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod observability;

pub use config::{Configuration, ConfigurationView, ServerConfig, Settings};
pub use dispatch::Dispatcher;
pub use events::{Event, EventBus, EventKind};
pub use handlers::{Handler, HandlerRegistry, Outcome, RedirectContext, Target};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use mapping::{Mapping, MappingSource};
