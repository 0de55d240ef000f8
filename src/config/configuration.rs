//! Checked configuration shared by the dispatch engine.
//!
//! # Responsibilities
//! - Own the settings, the handler registry and the active mapping table
//! - Check mappings against the registry
//! - Hand handlers a view bound to the request they serve
//!
//! # Design Decisions
//! - The mapping table is an `ArcSwap` of an immutable vector: readers
//!   load a snapshot, writers replace it wholesale
//! - Only the holding protocol replaces the table

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use super::schema::Settings;
use crate::error::{SetMappingsError, ValidationError};
use crate::handlers::HandlerRegistry;
use crate::mapping::{check, CheckedMapping, MappingSource};
use crate::registry::{self, RequestRegistry};

pub type MappingTable = Arc<Vec<Arc<CheckedMapping>>>;

pub struct Configuration {
    settings: Settings,
    handlers: HandlerRegistry,
    mappings: ArcSwap<Vec<Arc<CheckedMapping>>>,
}

impl Configuration {
    /// A configuration without mappings.
    pub fn new(settings: Settings, handlers: HandlerRegistry) -> Self {
        Self {
            settings,
            handlers,
            mappings: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Default settings and the built-in handlers.
    pub fn empty() -> Self {
        Self::new(Settings::default(), HandlerRegistry::builtin())
    }

    /// Build a configuration and check its mappings in order.
    pub async fn check(
        settings: Settings,
        handlers: HandlerRegistry,
        mappings: Vec<MappingSource>,
    ) -> Result<Self, ValidationError> {
        let configuration = Self::new(settings, handlers);
        let mut checked = Vec::with_capacity(mappings.len());
        for source in mappings {
            checked.push(check(&configuration, source).await?);
        }
        configuration.replace_mappings(checked);
        Ok(configuration)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Snapshot of the active mapping table.
    pub fn mappings(&self) -> MappingTable {
        self.mappings.load_full()
    }

    pub(crate) fn replace_mappings(&self, mappings: Vec<Arc<CheckedMapping>>) {
        self.mappings.store(Arc::new(mappings));
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("settings", &self.settings)
            .field("handlers", &self.handlers)
            .field("mappings", &self.mappings.load().len())
            .finish()
    }
}

/// What a handler sees of the configuration.
#[derive(Clone)]
pub struct ConfigurationView {
    configuration: Arc<Configuration>,
    registry: Arc<RequestRegistry>,
    request_id: Option<u64>,
}

impl ConfigurationView {
    pub(crate) fn new(
        configuration: Arc<Configuration>,
        registry: Arc<RequestRegistry>,
        request_id: Option<u64>,
    ) -> Self {
        Self {
            configuration,
            registry,
            request_id,
        }
    }

    pub fn settings(&self) -> &Settings {
        self.configuration.settings()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.configuration.handlers().names().collect()
    }

    pub fn mappings(&self) -> MappingTable {
        self.configuration.mappings()
    }

    /// Id of the request this view was handed to.
    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    /// Replace the mapping table, never waiting on the calling request.
    ///
    /// `timeout` defaults to the configured holding timeout.
    pub async fn set_mappings(
        &self,
        mappings: Vec<MappingSource>,
        timeout: Option<Duration>,
    ) -> Result<(), SetMappingsError> {
        let timeout = timeout.unwrap_or_else(|| self.settings().holding_timeout());
        registry::set_mappings(
            &self.configuration,
            &self.registry,
            mappings,
            self.request_id,
            timeout,
        )
        .await
    }
}

impl fmt::Debug for ConfigurationView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationView")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
