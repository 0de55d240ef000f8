//! Request mappings.
//!
//! # Data Flow
//! ```text
//! raw mapping (configuration data or builder)
//!     → mod.rs (Mapping: typed match/method/flags + handler properties)
//!     → validator.rs (resolve handler, schema, handler validation)
//!     → matcher.rs (compile match spec, method filter, invert, if-match)
//!     → CheckedMapping (immutable, shared via Arc)
//!
//! At request time:
//!     CheckedMapping::matcher().evaluate(request, url)
//!     → interpolate.rs ($1, $name, $$ in the handler payload)
//! ```
//!
//! # Design Decisions
//! - Raw and checked mappings are distinct types; checking twice is a no-op
//! - Mapping tables are swapped wholesale, a checked mapping is never mutated
//! - Array order is priority, first match wins

pub mod interpolate;
pub mod matcher;
pub mod validator;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::dispatch::request::IncomingRequest;
use crate::error::{HandlerError, ValidationError};
use crate::handlers::custom::CustomFn;
use crate::handlers::{HandlerBinding, Target};

pub use matcher::{MatchOutcome, MatchResult, Matcher};
pub use validator::{check, check_mapping};

/// How a mapping matches URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSpec {
    /// Regular expression source, not anchored unless the pattern says so.
    Pattern(String),
    /// Pattern plus flag letters, for configuration files.
    Regex { re: String, flags: String },
}

/// Result of an `if-match` predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfMatch {
    Accept,
    Reject,
    Redirect(Target),
}

pub type IfMatchFn = Arc<
    dyn Fn(Arc<IncomingRequest>, String, MatchResult) -> BoxFuture<'static, Result<IfMatch, HandlerError>>
        + Send
        + Sync,
>;

/// A handler property value.
#[derive(Clone)]
pub enum Property {
    Value(Value),
    Function(CustomFn),
}

impl Property {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Property::Value(value) => Some(value),
            Property::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&CustomFn> {
        match self {
            Property::Function(f) => Some(f),
            Property::Value(_) => None,
        }
    }

    /// Substitute capture groups when the property is a string.
    pub fn interpolate(&self, captures: &MatchResult) -> Property {
        match self {
            Property::Value(Value::String(template)) => {
                Property::Value(Value::String(interpolate::interpolate(template, captures)))
            }
            other => other.clone(),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Property::Function(_) => f.write_str("Function"),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Value(Value::String(s)) => f.write_str(s),
            Property::Value(value) => write!(f, "{value}"),
            Property::Function(_) => f.write_str("function"),
        }
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Property::Value(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Property::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Property::Value(Value::String(value))
    }
}

impl From<u16> for Property {
    fn from(value: u16) -> Self {
        Property::Value(Value::from(value))
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Property::Value(Value::Bool(value))
    }
}

/// A declarative mapping before validation.
#[derive(Clone, Default)]
pub struct Mapping {
    pub match_spec: Option<MatchSpec>,
    /// Upper-cased method names; `None` accepts what the handler accepts.
    pub method: Option<Vec<String>>,
    pub invert_match: bool,
    pub if_match: Option<IfMatchFn>,
    pub exclude_from_holding_list: bool,
    pub cwd: Option<PathBuf>,
    /// Handler type key and handler-specific properties.
    pub properties: BTreeMap<String, Property>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, pattern: impl Into<String>) -> Self {
        self.match_spec = Some(MatchSpec::Pattern(pattern.into()));
        self
    }

    pub fn matching_regex(mut self, re: impl Into<String>, flags: impl Into<String>) -> Self {
        self.match_spec = Some(MatchSpec::Regex {
            re: re.into(),
            flags: flags.into(),
        });
        self
    }

    /// Restrict methods, comma or space separated.
    pub fn method(mut self, methods: &str) -> Self {
        self.method = Some(split_methods(methods));
        self
    }

    pub fn invert_match(mut self, invert: bool) -> Self {
        self.invert_match = invert;
        self
    }

    pub fn if_match<F, Fut>(mut self, predicate: F) -> Self
    where
        F: Fn(Arc<IncomingRequest>, String, MatchResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<IfMatch, HandlerError>> + Send + 'static,
    {
        self.if_match = Some(Arc::new(move |request, url, captures| {
            Box::pin(predicate(request, url, captures))
        }));
        self
    }

    pub fn exclude_from_holding_list(mut self, exclude: bool) -> Self {
        self.exclude_from_holding_list = exclude;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set a handler property (or the handler type key itself).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Property>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn file(self, path: impl Into<String>) -> Self {
        self.with("file", path.into())
    }

    pub fn status(self, code: u16) -> Self {
        self.with("status", code)
    }

    pub fn url(self, url: impl Into<String>) -> Self {
        self.with("url", url.into())
    }

    pub fn custom(self, function: Property) -> Self {
        self.with("custom", function)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Parse a mapping from configuration data, type-checking the generic keys.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(object) = value else {
            return Err(ValidationError::Malformed("mapping must be an object".into()));
        };
        let mut object: Map<String, Value> = object;
        let mut mapping = Mapping::new();

        if let Some(spec) = object.remove("match") {
            mapping.match_spec = Some(parse_match(spec)?);
        }

        if let Some(method) = object.remove("method") {
            mapping.method = Some(parse_method(method)?);
        }

        if let Some(invert) = object.remove("invert-match") {
            mapping.invert_match = expect_bool("invert-match", invert)?;
        }

        if object.remove("if-match").is_some() {
            return Err(ValidationError::InvalidType {
                property: "if-match".into(),
                expected: "function".into(),
            });
        }

        if let Some(exclude) = object.remove("exclude-from-holding-list") {
            mapping.exclude_from_holding_list = expect_bool("exclude-from-holding-list", exclude)?;
        }

        if let Some(cwd) = object.remove("cwd") {
            let Value::String(cwd) = cwd else {
                return Err(ValidationError::InvalidType {
                    property: "cwd".into(),
                    expected: "string".into(),
                });
            };
            mapping.cwd = Some(PathBuf::from(cwd));
        }

        mapping.properties = object
            .into_iter()
            .map(|(name, value)| (name, Property::Value(value)))
            .collect();
        Ok(mapping)
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("match_spec", &self.match_spec)
            .field("method", &self.method)
            .field("invert_match", &self.invert_match)
            .field("if_match", &self.if_match.is_some())
            .field("exclude_from_holding_list", &self.exclude_from_holding_list)
            .field("cwd", &self.cwd)
            .field("properties", &self.properties)
            .finish()
    }
}

fn split_methods(methods: &str) -> Vec<String> {
    methods
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|m| !m.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn parse_match(spec: Value) -> Result<MatchSpec, ValidationError> {
    match spec {
        Value::String(pattern) => Ok(MatchSpec::Pattern(pattern)),
        Value::Object(mut object) => {
            let re = match object.remove("re") {
                Some(Value::String(re)) => re,
                _ => return Err(ValidationError::InvalidMatch("missing re".into())),
            };
            let flags = match object.remove("flags") {
                None => String::new(),
                Some(Value::String(flags)) => flags,
                Some(other) => {
                    return Err(ValidationError::InvalidMatch(format!("invalid flags {other}")))
                }
            };
            Ok(MatchSpec::Regex { re, flags })
        }
        other => Err(ValidationError::InvalidMatch(format!(
            "expected a string or {{re, flags}}, got {other}"
        ))),
    }
}

fn parse_method(method: Value) -> Result<Vec<String>, ValidationError> {
    match method {
        Value::String(methods) => Ok(split_methods(&methods)),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(m) => Ok(m.to_uppercase()),
                other => Err(ValidationError::InvalidMethod(other.to_string())),
            })
            .collect(),
        other => Err(ValidationError::InvalidMethod(other.to_string())),
    }
}

fn expect_bool(property: &str, value: Value) -> Result<bool, ValidationError> {
    value.as_bool().ok_or_else(|| ValidationError::InvalidType {
        property: property.into(),
        expected: "boolean".into(),
    })
}

/// A mapping that passed validation.
pub struct CheckedMapping {
    mapping: Mapping,
    matcher: Matcher,
    binding: HandlerBinding,
    methods: Option<Vec<Method>>,
}

impl CheckedMapping {
    pub(crate) fn new(
        mapping: Mapping,
        matcher: Matcher,
        binding: HandlerBinding,
        methods: Option<Vec<Method>>,
    ) -> Self {
        Self {
            mapping,
            matcher,
            binding,
            methods,
        }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn binding(&self) -> &HandlerBinding {
        &self.binding
    }

    pub fn handler_type(&self) -> &str {
        &self.binding.handler_type
    }

    /// Effective method restriction after intersecting with the handler's.
    pub fn methods(&self) -> Option<&[Method]> {
        self.methods.as_deref()
    }

    pub fn excluded_from_holding_list(&self) -> bool {
        self.mapping.exclude_from_holding_list
    }
}

impl fmt::Debug for CheckedMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckedMapping")
            .field("handler_type", &self.binding.handler_type)
            .field("match_spec", &self.mapping.match_spec)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Input to the validator: raw mappings are checked, checked ones pass through.
#[derive(Clone)]
pub enum MappingSource {
    Raw(Mapping),
    Checked(Arc<CheckedMapping>),
}

impl From<Mapping> for MappingSource {
    fn from(mapping: Mapping) -> Self {
        MappingSource::Raw(mapping)
    }
}

impl From<Arc<CheckedMapping>> for MappingSource {
    fn from(mapping: Arc<CheckedMapping>) -> Self {
        MappingSource::Checked(mapping)
    }
}
