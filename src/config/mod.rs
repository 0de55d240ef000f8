//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML or JSON)
//!     → loader.rs (parse & deserialize, resolve cwd)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (settings + raw mappings)
//!     → configuration.rs (mappings checked against the handler registry)
//!     → Configuration, shared via Arc with the dispatch engine
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → mappings swapped through the holding protocol
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; only the mapping table is swapped
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod configuration;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use configuration::{Configuration, ConfigurationView, MappingTable};
pub use schema::{ObservabilityConfig, Protocol, ServerConfig, Settings, SslConfig};
