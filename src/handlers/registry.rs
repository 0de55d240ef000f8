//! Handler lookup by type name.
//!
//! Built-in handlers are registered first and cannot be replaced; user
//! handlers follow in registration order. Order matters: a mapping binds to
//! the first handler whose name it carries as a property.

use std::fmt;
use std::sync::Arc;

use super::custom::CustomHandler;
use super::file::FileHandler;
use super::status::StatusHandler;
use super::url::UrlHandler;
use super::Handler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOrigin {
    BuiltIn,
    User,
}

#[derive(Clone)]
pub struct HandlerEntry {
    name: String,
    origin: HandlerOrigin,
    handler: Arc<dyn Handler>,
}

impl HandlerEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> HandlerOrigin {
        self.origin
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

#[derive(Clone)]
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
    status: Arc<dyn Handler>,
}

impl HandlerRegistry {
    /// Registry holding only the built-in handlers.
    pub fn builtin() -> Self {
        let status: Arc<dyn Handler> = Arc::new(StatusHandler::new());
        let builtins: [(&str, Arc<dyn Handler>); 4] = [
            ("custom", Arc::new(CustomHandler::new())),
            ("file", Arc::new(FileHandler::new())),
            ("status", status.clone()),
            ("url", Arc::new(UrlHandler::new())),
        ];
        let entries = builtins
            .into_iter()
            .map(|(name, handler)| HandlerEntry {
                name: name.to_string(),
                origin: HandlerOrigin::BuiltIn,
                handler,
            })
            .collect();
        Self { entries, status }
    }

    /// Append a user handler. A name already taken is ignored.
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        let name = name.into();
        if let Some(existing) = self.entries.iter().find(|entry| entry.name == name) {
            tracing::warn!(
                handler = %name,
                origin = ?existing.origin,
                "Handler name already registered, ignoring"
            );
            return self;
        }
        self.entries.push(HandlerEntry {
            name,
            origin: HandlerOrigin::User,
            handler,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.handler)
    }

    /// The built-in status handler used for numeric redirects.
    pub fn status(&self) -> &Arc<dyn Handler> {
        &self.status
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handlers::{Outcome, RedirectContext};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn redirect(&self, _context: RedirectContext) -> Result<Outcome, HandlerError> {
            Ok(Outcome::Handled)
        }
    }

    #[test]
    fn builtins_come_first() {
        let registry = HandlerRegistry::builtin().register("echo", Arc::new(Echo));
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, ["custom", "file", "status", "url", "echo"]);
        assert_eq!(registry.iter().last().map(HandlerEntry::origin), Some(HandlerOrigin::User));
    }

    #[test]
    fn builtin_cannot_be_overridden() {
        let builtin = HandlerRegistry::builtin();
        let original = builtin.get("file").cloned().unwrap();
        let registry = builtin.register("file", Arc::new(Echo));

        assert_eq!(registry.len(), 4);
        assert!(Arc::ptr_eq(registry.get("file").unwrap(), &original));
    }
}
