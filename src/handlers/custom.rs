//! Custom code handler.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use super::{Handler, Outcome, PropertySchema, PropertyType, RedirectContext};
use crate::error::HandlerError;
use crate::mapping::Property;

pub type CustomFn =
    Arc<dyn Fn(RedirectContext) -> BoxFuture<'static, Result<Outcome, HandlerError>> + Send + Sync>;

/// Wrap an async function as a `custom` mapping payload.
pub fn custom<F, Fut>(function: F) -> Property
where
    F: Fn(RedirectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, HandlerError>> + Send + 'static,
{
    Property::Function(Arc::new(move |context| Box::pin(function(context))))
}

pub struct CustomHandler {
    schema: Vec<PropertySchema>,
}

impl CustomHandler {
    pub fn new() -> Self {
        Self {
            schema: vec![PropertySchema::required("custom", &[PropertyType::Function])],
        }
    }
}

impl Default for CustomHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for CustomHandler {
    fn schema(&self) -> &[PropertySchema] {
        &self.schema
    }

    async fn redirect(&self, context: RedirectContext) -> Result<Outcome, HandlerError> {
        let function = context
            .redirect
            .as_function()
            .cloned()
            .ok_or_else(|| HandlerError::message("custom payload is not a function"))?;
        function(context).await
    }
}
