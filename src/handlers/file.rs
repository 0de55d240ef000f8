//! File handler.
//!
//! # Responsibilities
//! - Resolve the interpolated path below the mapping `cwd`
//! - Refuse paths escaping `cwd` and directories (403)
//! - Redirect missing files to 404
//! - Stream file content in fixed-size chunks (no body for HEAD)
//!
//! # Design Decisions
//! - No caching or byte ranges; content type from the mapping's
//!   `mime-types` table, `application/octet-stream` otherwise

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::Value;
use tokio::io::AsyncReadExt;

use super::{Handler, Outcome, PropertySchema, PropertyType, RedirectContext, Target};
use crate::config::Configuration;
use crate::error::{HandlerError, ValidationError};
use crate::mapping::Mapping;

const CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

static FILE_METHODS: [Method; 2] = [Method::GET, Method::HEAD];

pub struct FileHandler {
    schema: Vec<PropertySchema>,
}

impl FileHandler {
    pub fn new() -> Self {
        Self {
            schema: vec![
                PropertySchema::required("file", &[PropertyType::String]),
                PropertySchema::optional("mime-types", &[PropertyType::Object])
                    .with_default(Value::Object(Default::default())),
            ],
        }
    }
}

impl Default for FileHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Join a URL-like path to `root`, refusing `..` escapes.
fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = relative.split(['?', '#']).next().unwrap_or_default();
    let mut path = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth.checked_sub(1)?;
                path.pop();
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

fn content_type(context: &RedirectContext, path: &Path) -> HeaderValue {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    context
        .property("mime-types")
        .and_then(|p| p.as_value())
        .and_then(|types| types.get(extension))
        .and_then(Value::as_str)
        .and_then(|mime| HeaderValue::from_str(mime).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE))
}

#[async_trait]
impl Handler for FileHandler {
    fn schema(&self) -> &[PropertySchema] {
        &self.schema
    }

    fn methods(&self) -> Option<&[Method]> {
        Some(&FILE_METHODS)
    }

    async fn validate(
        &self,
        mapping: &mut Mapping,
        _configuration: &Configuration,
    ) -> Result<(), ValidationError> {
        let types = mapping.property("mime-types").and_then(|p| p.as_value());
        if let Some(Value::Object(types)) = types {
            if types.values().any(|mime| !mime.is_string()) {
                return Err(ValidationError::Handler {
                    handler: "file".into(),
                    message: "mime-types values must be strings".into(),
                });
            }
        }
        Ok(())
    }

    async fn redirect(&self, context: RedirectContext) -> Result<Outcome, HandlerError> {
        let requested = context.redirect_str().unwrap_or_default();
        let Some(path) = resolve(context.cwd(), requested) else {
            tracing::debug!(path = %requested, "File path escapes mapping root");
            return Ok(Outcome::Redirect(Target::Status(403)));
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::Redirect(Target::Status(404)));
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Ok(Outcome::Redirect(Target::Status(403)));
        }

        let mut file = tokio::fs::File::open(&path).await?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, content_type(&context, &path));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        context.response.write_head(StatusCode::OK, headers)?;

        if context.request.method() != Method::HEAD {
            let mut buffer = vec![0u8; CHUNK_SIZE];
            loop {
                let read = file.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                context.response.write(buffer[..read].to_vec()).await?;
            }
        }
        context.response.end().await?;
        Ok(Outcome::Handled)
    }
}
