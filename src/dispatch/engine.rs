//! Dispatch engine.
//!
//! # Data Flow
//! ```text
//! handle(request, response)
//!     → registry.open, emit incoming
//!     → await admission (held while mappings are replaced)
//!     → loop:
//!         status target → built-in status handler
//!         URL target    → scan mappings from index, first match wins
//!                         → emit redirecting, Handler::redirect
//!         Handled + response ended     → done
//!         Handled + response still open → chain to index + 1, same URL
//!         Redirect(target)             → redirect counter, rescan from 0
//!         error                        → emit error, redispatch status
//!     → emit redirected / aborted / closed, registry.remove
//! ```
//!
//! # Design Decisions
//! - One loop drives redirects, chaining and the error path; nothing recurses
//! - The error path runs at most once; a second failure terminates the
//!   response without calling any handler
//! - A client gone (aborted or closed) short-circuits to cleanup at the
//!   next step and on the error path
//! - A panicking handler or `if-match` predicate fails its request with 500
//! - Registry cleanup runs on drop, so a cancelled dispatch never holds up
//!   `set_mappings`

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::FutureExt;

use super::context::{RequestContext, Resolution, Step};
use super::request::{IncomingRequest, TransportState};
use super::response::ResponseWriter;
use crate::config::{Configuration, ConfigurationView};
use crate::error::{DispatchError, HandlerError, SetMappingsError};
use crate::events::{ErrorReason, Event, EventBus, RequestInfo};
use crate::handlers::{Handler, Outcome, RedirectContext, Target};
use crate::mapping::{CheckedMapping, MappingSource, MatchOutcome, MatchResult, Property};
use crate::registry::{self, Ending, RequestRegistry, TrackedRequest};

/// Drives requests through the mapping table.
pub struct Dispatcher {
    configuration: Arc<Configuration>,
    registry: Arc<RequestRegistry>,
    events: Arc<EventBus>,
    closing: AtomicBool,
}

impl Dispatcher {
    pub fn new(configuration: Arc<Configuration>, events: Arc<EventBus>) -> Self {
        Self {
            configuration,
            registry: Arc::new(RequestRegistry::new()),
            events,
            closing: AtomicBool::new(false),
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// From now on every dispatch answers 503.
    pub fn begin_shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn view(&self, request_id: Option<u64>) -> ConfigurationView {
        ConfigurationView::new(self.configuration.clone(), self.registry.clone(), request_id)
    }

    /// Replace the mapping table from outside any request.
    pub async fn set_mappings(
        &self,
        mappings: Vec<MappingSource>,
        timeout: Option<Duration>,
    ) -> Result<(), SetMappingsError> {
        let timeout = timeout.unwrap_or_else(|| self.configuration.settings().holding_timeout());
        registry::set_mappings(&self.configuration, &self.registry, mappings, None, timeout).await
    }

    /// Dispatch one request until its response is finished.
    pub async fn handle(&self, request: IncomingRequest, response: ResponseWriter) {
        let tracked = self.registry.open(request.method().clone(), request.url());
        let _departure = Departure {
            registry: &self.registry,
            tracked: tracked.clone(),
        };
        let info = RequestInfo {
            id: tracked.id(),
            method: request.method().clone(),
            url: request.url().to_string(),
            start: SystemTime::now(),
        };
        self.events.notify(Event::Incoming {
            request: info.clone(),
            headers: request.headers().clone(),
        });

        self.registry.await_admission(&tracked).await;

        let url = info.url.clone();
        let mut context = RequestContext::new(
            tracked,
            Arc::new(request),
            response,
            info,
            self.configuration.mappings(),
        );

        let first = if self.is_closing() {
            Err(DispatchError::ShuttingDown)
        } else {
            Ok(Step::to(Target::Url(url)))
        };
        self.drive(&mut context, first).await;
        self.complete(&context);
    }

    async fn drive(&self, context: &mut RequestContext, first: Result<Step, DispatchError>) {
        let mut next = first;
        loop {
            let step = match next {
                Ok(step) => step,
                Err(error) => match self.fail(context, error) {
                    Some(step) => step,
                    None => return,
                },
            };
            if context.request.is_gone() {
                tracing::debug!(request_id = context.id(), "Client gone, skipping dispatch");
                return;
            }

            next = match self.step(context, step).await {
                Ok(Resolution::Done) => return,
                Ok(Resolution::Chain(step)) => Ok(step),
                Ok(Resolution::Redirect(target)) => self.redirect(context, target),
                Err(error) => Err(error),
            };
        }
    }

    fn redirect(&self, context: &mut RequestContext, target: Target) -> Result<Step, DispatchError> {
        context.redirect_count += 1;
        let max_redirect = self.configuration.settings().max_redirect;
        if context.redirect_count > max_redirect {
            return Err(DispatchError::LoopDetected(max_redirect));
        }
        tracing::trace!(
            request_id = context.id(),
            target = %target,
            count = context.redirect_count,
            "Internal redirect"
        );
        Ok(Step::to(target))
    }

    async fn step(&self, context: &mut RequestContext, step: Step) -> Result<Resolution, DispatchError> {
        let url = match step.target {
            Target::Status(code) => {
                let handler = self.configuration.handlers().status().clone();
                let outcome = self
                    .invoke(context, "status", handler, None, MatchResult::default(), Property::from(code))
                    .await?;
                return Ok(match outcome {
                    Outcome::Handled => Resolution::Done,
                    Outcome::Redirect(target) => Resolution::Redirect(target),
                });
            }
            Target::Url(url) => url,
        };

        // A new URL sees the current table; chaining keeps scanning the same one.
        if step.index == 0 {
            context.mappings = self.configuration.mappings();
        }
        let mappings = context.mappings.clone();

        for (index, mapping) in mappings.iter().enumerate().skip(step.index) {
            let evaluation = contained(mapping.matcher().evaluate(&context.request, &url)).await;
            let captures = match evaluation? {
                MatchOutcome::NoMatch => continue,
                MatchOutcome::Redirect(target) => return Ok(Resolution::Redirect(target)),
                MatchOutcome::Matched(captures) => captures,
            };

            if mapping.excluded_from_holding_list() {
                context.tracked.mark_excluded();
            }

            let binding = mapping.binding();
            let redirect = binding.payload.interpolate(&captures);
            let outcome = self
                .invoke(
                    context,
                    &binding.handler_type,
                    binding.handler.clone(),
                    Some(mapping.clone()),
                    captures,
                    redirect,
                )
                .await?;

            return Ok(match outcome {
                Outcome::Redirect(target) => Resolution::Redirect(target),
                Outcome::Handled if context.response.is_ended() => Resolution::Done,
                Outcome::Handled => Resolution::Chain(Step {
                    target: Target::Url(url),
                    index: index + 1,
                }),
            });
        }

        Err(DispatchError::NoMapping)
    }

    async fn invoke(
        &self,
        context: &RequestContext,
        handler_type: &str,
        handler: Arc<dyn Handler>,
        mapping: Option<Arc<CheckedMapping>>,
        captures: MatchResult,
        redirect: Property,
    ) -> Result<Outcome, HandlerError> {
        self.events.notify(Event::Redirecting {
            request: context.info.clone(),
            handler_type: handler_type.to_string(),
            redirect: redirect.to_string(),
        });

        contained(handler.redirect(RedirectContext {
            configuration: self.view(Some(context.id())),
            mapping,
            captures,
            redirect,
            request: context.request.clone(),
            response: context.response.clone(),
        }))
        .await
    }

    /// Error path: returns the status step to render, if any.
    fn fail(&self, context: &mut RequestContext, error: DispatchError) -> Option<Step> {
        let status = error.status_code();
        let reason = match &error {
            DispatchError::Handler(HandlerError::Status(code)) => ErrorReason::Status(*code),
            DispatchError::Handler(other) => ErrorReason::Failure(other.to_string()),
            _ => ErrorReason::Status(status),
        };

        let listeners = self.events.notify(Event::Error {
            request: context.info.clone(),
            reason,
        });
        if listeners == 0 {
            tracing::error!(
                request_id = context.id(),
                method = %context.info.method,
                url = %context.info.url,
                status,
                error = %error,
                "Request failed"
            );
        }

        if context.request.is_gone() {
            return None;
        }
        if context.failed {
            tracing::warn!(request_id = context.id(), error = %error, "Error while handling an error, terminating response");
            context.response.terminate();
            return None;
        }
        context.failed = true;
        Some(Step::to(Target::Status(status)))
    }

    fn complete(&self, context: &RequestContext) {
        let status = context.response.status().map_or(0, |status| status.as_u16());
        let request = context.info.clone();
        let (event, ending) = match context.request.transport_state() {
            TransportState::Aborted => (Event::Aborted { request }, Ending::Aborted),
            TransportState::Closed => (Event::Closed { request }, Ending::Closed),
            _ if context.response.is_ended() => (
                Event::Redirected {
                    request,
                    end: SystemTime::now(),
                    time_spent: context.tracked.elapsed(),
                    status_code: status,
                },
                Ending::Status(status),
            ),
            _ => (Event::Closed { request }, Ending::Closed),
        };

        self.events.notify(event);
        context.tracked.finish(ending);
    }
}

/// Removes a request from the registry however its dispatch ends.
struct Departure<'a> {
    registry: &'a RequestRegistry,
    tracked: Arc<TrackedRequest>,
}

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        // No-op after `complete`; the first ending sticks.
        self.tracked.finish(Ending::Closed);
        self.registry.remove(self.tracked.id());
    }
}

/// Turn a panic in user code into a handler failure.
async fn contained<T>(
    future: impl Future<Output = Result<T, HandlerError>>,
) -> Result<T, HandlerError> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("configuration", &self.configuration)
            .field("in_flight", &self.registry.len())
            .field("closing", &self.is_closing())
            .finish()
    }
}
