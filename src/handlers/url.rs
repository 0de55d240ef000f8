//! URL proxy handler.
//!
//! # Responsibilities
//! - Forward the request (method, headers, body) to the interpolated URL
//! - Stream the upstream response back through the response writer
//! - Map upstream connection failures to 502 Bad Gateway
//!
//! # Design Decisions
//! - Plain HTTP upstreams through the hyper-util legacy client
//! - `host` is set from the target URL; hop-by-hop headers are not copied
//!   back, everything else passes through untouched

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request, Uri};
use futures_util::StreamExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use super::{Handler, Outcome, PropertySchema, PropertyType, RedirectContext};
use crate::config::Configuration;
use crate::error::{HandlerError, ValidationError};
use crate::mapping::Mapping;

const HOP_BY_HOP: [HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
];

pub struct UrlHandler {
    schema: Vec<PropertySchema>,
    client: Client<HttpConnector, Body>,
}

impl UrlHandler {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            schema: vec![PropertySchema::required("url", &[PropertyType::String])],
            client,
        }
    }
}

impl Default for UrlHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn forwarded_headers(source: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if name == header::HOST || HOP_BY_HOP.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[async_trait]
impl Handler for UrlHandler {
    fn schema(&self) -> &[PropertySchema] {
        &self.schema
    }

    async fn validate(
        &self,
        mapping: &mut Mapping,
        _configuration: &Configuration,
    ) -> Result<(), ValidationError> {
        let Some(target) = mapping.property("url").and_then(|p| p.as_str()) else {
            return Ok(());
        };
        // Templates are only checked once interpolated.
        if !target.contains('$') {
            url::Url::parse(target).map_err(|e| ValidationError::Handler {
                handler: "url".into(),
                message: format!("{target}: {e}"),
            })?;
        }
        Ok(())
    }

    async fn redirect(&self, context: RedirectContext) -> Result<Outcome, HandlerError> {
        let target = context.redirect_str().unwrap_or_default();
        let uri: Uri = target
            .parse()
            .map_err(|e| HandlerError::message(format!("invalid upstream URL {target}: {e}")))?;

        let mut builder = Request::builder()
            .method(context.request.method().clone())
            .uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = forwarded_headers(context.request.headers());
        }
        let body = context.request.take_body().unwrap_or_else(Body::empty);
        let request = builder
            .body(body)
            .map_err(|e| HandlerError::message(e.to_string()))?;

        let response = self.client.request(request).await.map_err(|e| {
            tracing::error!(url = %target, error = %e, "Upstream error");
            HandlerError::Upstream(e.to_string())
        })?;

        let (parts, body) = response.into_parts();
        let mut headers = parts.headers;
        for name in &HOP_BY_HOP {
            headers.remove(name);
        }
        context.response.write_head(parts.status, headers)?;

        let mut stream = Body::new(body).into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| HandlerError::Upstream(e.to_string()))?;
            context.response.write(chunk).await?;
        }
        context.response.end().await?;
        Ok(Outcome::Handled)
    }
}
