//! Per-request dispatch state.

use std::sync::Arc;

use super::request::IncomingRequest;
use super::response::ResponseWriter;
use crate::config::MappingTable;
use crate::events::RequestInfo;
use crate::handlers::Target;
use crate::registry::TrackedRequest;

/// Next thing to dispatch: a target, scanned from mapping `index` on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Step {
    pub target: Target,
    pub index: usize,
}

impl Step {
    pub fn to(target: Target) -> Self {
        Self { target, index: 0 }
    }
}

/// How one step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The response is finished.
    Done,
    /// The handler left the response open: keep scanning for the same URL.
    Chain(Step),
    /// Internal redirection, counted against `max-redirect`.
    Redirect(Target),
}

/// Owned by the dispatch engine for the lifetime of one request.
pub(crate) struct RequestContext {
    pub tracked: Arc<TrackedRequest>,
    pub request: Arc<IncomingRequest>,
    pub response: ResponseWriter,
    pub info: RequestInfo,
    /// Table the current URL is scanned against.
    pub mappings: MappingTable,
    pub redirect_count: usize,
    /// Set once the error path ran; a second error terminates the response.
    pub failed: bool,
}

impl RequestContext {
    pub fn new(
        tracked: Arc<TrackedRequest>,
        request: Arc<IncomingRequest>,
        response: ResponseWriter,
        info: RequestInfo,
        mappings: MappingTable,
    ) -> Self {
        Self {
            tracked,
            request,
            response,
            info,
            mappings,
            redirect_count: 0,
            failed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }
}
