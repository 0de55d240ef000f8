//! Mapping match logic.
//!
//! # Responsibilities
//! - Compile the match specification into a regular expression
//! - Filter on request method
//! - Apply `invert-match` to the combined regex and method test
//! - Run the optional `if-match` predicate on a successful base match
//!
//! # Design Decisions
//! - Absent match spec = `^(.*)`, capture 1 is the whole URL
//! - No implicit anchoring, only the pattern's own anchors apply
//! - The predicate is only awaited when the base test succeeded

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use regex::{Regex, RegexBuilder};

use super::{IfMatch, IfMatchFn, MatchSpec};
use crate::dispatch::request::IncomingRequest;
use crate::error::{HandlerError, ValidationError};
use crate::handlers::Target;

/// Captures of a successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    groups: Vec<Option<String>>,
    named: HashMap<String, Option<String>>,
}

impl MatchResult {
    /// A result with the whole URL as capture 0.
    pub fn whole(url: &str) -> Self {
        Self {
            groups: vec![Some(url.to_string())],
            named: HashMap::new(),
        }
    }

    pub fn from_regex(regex: &Regex, url: &str) -> Option<Self> {
        let captures = regex.captures(url)?;
        let groups = captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .map(|name| {
                let value = captures.name(name).map(|m| m.as_str().to_string());
                (name.to_string(), value)
            })
            .collect();
        Some(Self { groups, named })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|group| group.as_deref())
    }

    /// `None` when the pattern has no such group, `Some(None)` when it did not participate.
    pub fn named(&self, name: &str) -> Option<Option<&str>> {
        self.named.get(name).map(|value| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    NoMatch,
    Matched(MatchResult),
    /// The `if-match` predicate replaced the handler with a redirect.
    Redirect(Target),
}

/// Compiled matcher of one mapping.
pub struct Matcher {
    regex: Regex,
    methods: Option<Vec<Method>>,
    invert: bool,
    if_match: Option<IfMatchFn>,
}

impl Matcher {
    pub fn compile(
        spec: Option<&MatchSpec>,
        methods: Option<Vec<Method>>,
        invert: bool,
        if_match: Option<IfMatchFn>,
    ) -> Result<Self, ValidationError> {
        let regex = match spec {
            None => build_regex("^(.*)", "")?,
            Some(MatchSpec::Pattern(pattern)) => build_regex(pattern, "")?,
            Some(MatchSpec::Regex { re, flags }) => build_regex(re, flags)?,
        };
        Ok(Self {
            regex,
            methods,
            invert,
            if_match,
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Regex and method test, before `if-match`.
    pub fn test(&self, method: &Method, url: &str) -> Option<MatchResult> {
        let method_allowed = self
            .methods
            .as_ref()
            .map_or(true, |methods| methods.contains(method));
        let base = if method_allowed {
            MatchResult::from_regex(&self.regex, url)
        } else {
            None
        };

        match (self.invert, base) {
            (false, base) => base,
            (true, Some(_)) => None,
            (true, None) => Some(MatchResult::whole(url)),
        }
    }

    pub async fn evaluate(
        &self,
        request: &Arc<IncomingRequest>,
        url: &str,
    ) -> Result<MatchOutcome, HandlerError> {
        let Some(captures) = self.test(request.method(), url) else {
            return Ok(MatchOutcome::NoMatch);
        };
        let Some(if_match) = &self.if_match else {
            return Ok(MatchOutcome::Matched(captures));
        };

        match if_match(request.clone(), url.to_string(), captures.clone()).await? {
            IfMatch::Accept => Ok(MatchOutcome::Matched(captures)),
            IfMatch::Reject => Ok(MatchOutcome::NoMatch),
            IfMatch::Redirect(target) => Ok(MatchOutcome::Redirect(target)),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("regex", &self.regex.as_str())
            .field("methods", &self.methods)
            .field("invert", &self.invert)
            .field("if_match", &self.if_match.is_some())
            .finish()
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, ValidationError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'u' | 'g' => &mut builder,
            other => {
                return Err(ValidationError::InvalidMatch(format!(
                    "unsupported flag {other:?} in {pattern}"
                )))
            }
        };
    }
    builder
        .build()
        .map_err(|e| ValidationError::InvalidMatch(format!("{pattern}: {e}")))
}
