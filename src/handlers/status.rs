//! Status code handler.
//!
//! Also used directly by the dispatch engine to render numeric redirects
//! (404, 500, 501, 508, 503).

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

use super::{Handler, Outcome, PropertySchema, PropertyType, RedirectContext};
use crate::config::Configuration;
use crate::error::{HandlerError, ValidationError};
use crate::mapping::{Mapping, Property};

pub struct StatusHandler {
    schema: Vec<PropertySchema>,
}

impl StatusHandler {
    pub fn new() -> Self {
        Self {
            schema: vec![PropertySchema::required("status", &[PropertyType::Number])],
        }
    }
}

impl Default for StatusHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn status_code(property: &Property) -> Option<StatusCode> {
    property
        .as_value()
        .and_then(serde_json::Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
}

#[async_trait]
impl Handler for StatusHandler {
    fn schema(&self) -> &[PropertySchema] {
        &self.schema
    }

    async fn validate(
        &self,
        mapping: &mut Mapping,
        _configuration: &Configuration,
    ) -> Result<(), ValidationError> {
        match mapping.property("status") {
            Some(property) if status_code(property).is_some() => Ok(()),
            _ => Err(ValidationError::Handler {
                handler: "status".into(),
                message: "expected an HTTP status code".into(),
            }),
        }
    }

    async fn redirect(&self, context: RedirectContext) -> Result<Outcome, HandlerError> {
        let status = status_code(&context.redirect).ok_or(HandlerError::Status(500))?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u16));
        context.response.write_head(status, headers)?;
        context.response.end().await?;
        Ok(Outcome::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_status_codes() {
        assert_eq!(status_code(&Property::from(404u16)), Some(StatusCode::NOT_FOUND));
        assert_eq!(status_code(&Property::Value(json!(70000))), None);
        assert_eq!(status_code(&Property::Value(json!(-1))), None);
        assert_eq!(status_code(&Property::from("404")), None);
    }
}
