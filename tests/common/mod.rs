//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use reserve::dispatch::{IncomingRequest, ResponseWriter};
use reserve::{
    Configuration, Dispatcher, Event, EventBus, EventKind, HandlerRegistry, HttpServer,
    MappingSource, Settings, Shutdown,
};

/// Build a dispatcher over checked mappings with default settings.
pub async fn dispatcher(mappings: Vec<MappingSource>) -> Arc<Dispatcher> {
    dispatcher_with(Settings::default(), mappings).await
}

pub async fn dispatcher_with(settings: Settings, mappings: Vec<MappingSource>) -> Arc<Dispatcher> {
    let configuration = Configuration::check(settings, HandlerRegistry::builtin(), mappings)
        .await
        .expect("mappings should check");
    Arc::new(Dispatcher::new(Arc::new(configuration), Arc::new(EventBus::new())))
}

/// Records every event emitted on a bus.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn attach(events: &EventBus) -> Self {
        let recorder = Self::default();
        for kind in EventKind::ALL {
            let sink = recorder.events.clone();
            events.subscribe(kind, move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        }
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(Event::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|event| event.kind() == kind).count()
    }

    /// Handler types of the `redirecting` events, in order.
    pub fn handler_types(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Redirecting { handler_type, .. } => Some(handler_type),
                _ => None,
            })
            .collect()
    }
}

/// Response as seen by the client; `body` is `None` when the transfer was cut.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Reply {
    pub fn text(&self) -> String {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .unwrap_or_default()
    }
}

/// Dispatch a request and return the response once the dispatch finished.
pub async fn request(dispatcher: &Arc<Dispatcher>, method: Method, url: &str) -> Reply {
    let (incoming, guard) = IncomingRequest::new(method, url, HeaderMap::new(), Body::empty());
    let (writer, receiver) = ResponseWriter::channel();
    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.handle(incoming, writer).await }
    });
    let response = receiver.into_response(guard).await;
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.ok();
    task.await.expect("dispatch task panicked");
    Reply {
        status: parts.status,
        headers: parts.headers,
        body,
    }
}

pub async fn get(dispatcher: &Arc<Dispatcher>, url: &str) -> Reply {
    request(dispatcher, Method::GET, url).await
}

/// Settings rooted in a fresh directory containing `file.txt`.
pub fn site(name: &str) -> Settings {
    let dir = std::env::temp_dir().join(format!("reserve-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("file.txt"), "Hello World!").unwrap();
    Settings {
        cwd: dir,
        ..Settings::default()
    }
}

/// Run an HTTP server on a free local port.
pub async fn start_server(
    dispatcher: Arc<Dispatcher>,
) -> (SocketAddr, Shutdown, mpsc::UnboundedSender<reserve::ServerConfig>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let server = HttpServer::new(dispatcher).unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, server_shutdown).await;
    });
    (addr, shutdown, updates_tx)
}

/// Start a mock upstream that answers every request with a fixed body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buffer = [0u8; 1024];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buffer).await;
                let response_str = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Upstream: mock\r\nConnection: close\r\n\r\n{}",
                    response.len(),
                    response
                );
                let _ = socket.write_all(response_str.as_bytes()).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });
    addr
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
