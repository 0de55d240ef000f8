//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all dispatch route
//! - Bridge axum requests to the dispatch engine and back
//! - Bind the server to a listener (plain TCP, or TLS via axum-server)
//! - Emit `created` and `ready`
//! - Apply configuration updates through the holding protocol
//! - Stop accepting on shutdown, answering 503 meanwhile

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, IncomingRequest, ResponseWriter};
use crate::error::ListenerError;
use crate::events::Event;
use crate::mapping::MappingSource;

const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP front end of the dispatch engine.
pub struct HttpServer {
    router: Router,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    /// Emits `created`; a failing `created` listener aborts construction.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Result<Self, ListenerError> {
        dispatcher.events().emit(Event::Created {
            configuration: dispatcher.configuration().clone(),
        })?;
        let router = Self::build_router(dispatcher.clone());
        Ok(Self { router, dispatcher })
    }

    fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .fallback(dispatch_handler)
            .with_state(dispatcher)
            .layer(TraceLayer::new_for_http())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ServerConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(apply_updates(self.dispatcher.clone(), config_updates));
        emit_ready(&self.dispatcher, addr);

        let dispatcher = self.dispatcher.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                dispatcher.begin_shutdown();
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS on `addr`.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<ServerConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let handle = axum_server::Handle::new();

        tokio::spawn(apply_updates(self.dispatcher.clone(), config_updates));

        tokio::spawn({
            let handle = handle.clone();
            let dispatcher = self.dispatcher.clone();
            async move {
                if let Some(bound) = handle.listening().await {
                    tracing::info!(address = %bound, "HTTPS server starting");
                    emit_ready(&dispatcher, bound);
                }
            }
        });

        tokio::spawn({
            let handle = handle.clone();
            let dispatcher = self.dispatcher.clone();
            async move {
                let _ = shutdown.recv().await;
                dispatcher.begin_shutdown();
                tracing::info!("Shutdown signal received, draining connections");
                handle.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
            }
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

fn emit_ready(dispatcher: &Dispatcher, addr: SocketAddr) {
    let settings = dispatcher.configuration().settings();
    let url = format!(
        "{}://{}:{}/",
        settings.protocol.as_str(),
        settings.hostname,
        addr.port()
    );
    dispatcher.events().notify(Event::Ready {
        url,
        port: addr.port(),
        http2: settings.http2,
    });
}

/// Swap in the mappings of every reloaded configuration.
async fn apply_updates(
    dispatcher: Arc<Dispatcher>,
    mut updates: mpsc::UnboundedReceiver<ServerConfig>,
) {
    while let Some(config) = updates.recv().await {
        let mappings = match config.parse_mappings() {
            Ok(mappings) => mappings,
            Err(e) => {
                tracing::error!(error = %e, "Reloaded mappings are invalid, keeping current ones");
                continue;
            }
        };
        let sources: Vec<MappingSource> = mappings.into_iter().map(MappingSource::from).collect();
        match dispatcher.set_mappings(sources, None).await {
            Ok(()) => tracing::info!("Configuration reloaded"),
            Err(e) => tracing::error!(error = %e, "Configuration reload failed"),
        }
    }
}

/// Catch-all route: the engine runs in its own task and feeds the response.
async fn dispatch_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
) -> Response {
    let (incoming, guard) = IncomingRequest::from_http(request);
    let (writer, receiver) = ResponseWriter::channel();
    tokio::spawn(async move {
        dispatcher.handle(incoming, writer).await;
    });
    receiver.into_response(guard).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Settings};
    use crate::events::{EventBus, EventKind};
    use crate::handlers::HandlerRegistry;
    use crate::mapping::Mapping;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    async fn server(mappings: Vec<MappingSource>) -> HttpServer {
        let configuration = Configuration::check(Settings::default(), HandlerRegistry::builtin(), mappings)
            .await
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(configuration), Arc::new(EventBus::new())));
        HttpServer::new(dispatcher).unwrap()
    }

    #[tokio::test]
    async fn routes_every_path_to_the_dispatcher() {
        let server = server(vec![Mapping::new().matching("^/teapot$").status(418).into()]).await;

        let response = server
            .router
            .clone()
            .oneshot(Request::get("/teapot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);

        let response = server
            .router
            .oneshot(Request::get("/elsewhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn failing_created_listener_aborts_startup() {
        let events = Arc::new(EventBus::new());
        events.subscribe(EventKind::Created, |_| Err(ListenerError::new("cannot start")));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(Configuration::empty()), events));
        assert!(HttpServer::new(dispatcher).is_err());
    }
}
