//! Handler subsystem.
//!
//! # Data Flow
//! ```text
//! mapping matched
//!     → dispatch engine builds a RedirectContext (interpolated payload)
//!     → Handler::redirect(context)
//!     → Outcome::Handled             (response written, or left for chaining)
//!     → Outcome::Redirect(Target)    (internal redirect to a URL or status)
//! ```
//!
//! # Built-in handlers
//! - `custom`: user supplied async function
//! - `file`: serves a file below the mapping `cwd`
//! - `status`: writes a status code
//! - `url`: proxies to an upstream URL
//!
//! # Design Decisions
//! - Handlers are shared immutable trait objects
//! - Built-ins always win over a user handler with the same name
//! - The redispatch-vs-done distinction is an enum, not a value sniff

pub mod custom;
pub mod file;
pub mod registry;
pub mod status;
pub mod url;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value;

use crate::config::{Configuration, ConfigurationView};
use crate::dispatch::request::IncomingRequest;
use crate::dispatch::response::ResponseWriter;
use crate::error::{HandlerError, ValidationError};
use crate::mapping::{CheckedMapping, MatchResult, Mapping, Property};

pub use registry::{HandlerOrigin, HandlerRegistry};

/// Where an internal redirect goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Status(u16),
    Url(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Status(code) => write!(f, "{code}"),
            Target::Url(url) => f.write_str(url),
        }
    }
}

/// Result of a handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The handler took care of the response. If it did not end the response,
    /// the next matching mapping is tried for the same URL.
    Handled,
    /// Dispatch again to the target.
    Redirect(Target),
}

impl From<u16> for Outcome {
    fn from(code: u16) -> Self {
        Outcome::Redirect(Target::Status(code))
    }
}

impl From<&str> for Outcome {
    fn from(url: &str) -> Self {
        Outcome::Redirect(Target::Url(url.to_string()))
    }
}

impl From<String> for Outcome {
    fn from(url: String) -> Self {
        Outcome::Redirect(Target::Url(url))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Function,
    Object,
    Array,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Function => "function",
            PropertyType::Object => "object",
            PropertyType::Array => "array",
        }
    }
}

/// Declaration of one handler property.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub name: String,
    pub types: Vec<PropertyType>,
    pub required: bool,
    pub default: Option<Value>,
}

impl PropertySchema {
    pub fn required(name: &str, types: &[PropertyType]) -> Self {
        Self {
            name: name.to_string(),
            types: types.to_vec(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, types: &[PropertyType]) -> Self {
        Self {
            required: false,
            ..Self::required(name, types)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Everything a handler sees of the request being dispatched.
#[derive(Clone)]
pub struct RedirectContext {
    pub configuration: ConfigurationView,
    /// `None` when dispatching a status code directly.
    pub mapping: Option<Arc<CheckedMapping>>,
    pub captures: MatchResult,
    /// Handler payload with capture groups substituted.
    pub redirect: Property,
    pub request: Arc<IncomingRequest>,
    pub response: ResponseWriter,
}

impl RedirectContext {
    pub fn redirect_str(&self) -> Option<&str> {
        self.redirect.as_str()
    }

    /// A mapping property other than the payload.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.mapping.as_ref().and_then(|m| m.mapping().property(name))
    }

    /// Working directory of the mapping, or of the configuration.
    pub fn cwd(&self) -> &Path {
        self.mapping
            .as_ref()
            .and_then(|m| m.mapping().cwd.as_deref())
            .unwrap_or_else(|| self.configuration.settings().cwd.as_path())
    }
}

/// Handler bound to a checked mapping.
#[derive(Clone)]
pub struct HandlerBinding {
    pub handler_type: String,
    pub handler: Arc<dyn Handler>,
    pub payload: Property,
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Properties the handler reads from its mappings.
    fn schema(&self) -> &[PropertySchema] {
        &[]
    }

    /// Methods the handler accepts, `None` for any.
    fn methods(&self) -> Option<&[Method]> {
        None
    }

    /// Check (and possibly enrich) a mapping bound to this handler.
    async fn validate(
        &self,
        _mapping: &mut Mapping,
        _configuration: &Configuration,
    ) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn redirect(&self, context: RedirectContext) -> Result<Outcome, HandlerError>;
}
