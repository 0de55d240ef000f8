//! reserve command line entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use reserve::config::loader::load_config;
use reserve::config::watcher::ConfigWatcher;
use reserve::config::{Protocol, ServerConfig};
use reserve::net::tls::load_tls_config;
use reserve::observability::{logging, metrics};
use reserve::{
    lifecycle, Configuration, Dispatcher, EventBus, HandlerRegistry, HttpServer, MappingSource,
    Shutdown,
};

const DEFAULT_CONFIG: &str = "reserve.toml";

#[derive(Debug, Parser)]
#[command(name = "reserve", version, about = "Request-mapping HTTP server")]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not log requests.
    #[arg(long, conflicts_with = "verbose")]
    silent: bool,

    /// Log every request step.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG)).filter(|path| path.exists()));
    let mut config = match &config_path {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.observability.silent |= cli.silent;
    config.observability.verbose |= cli.verbose;

    logging::init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?config_path, "reserve starting");

    let events = Arc::new(EventBus::new());
    if !config.observability.silent {
        logging::attach(&events, config.observability.verbose);
    }
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                metrics::init_metrics(addr)?;
                metrics::attach(&events);
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mappings: Vec<MappingSource> = config
        .parse_mappings()?
        .into_iter()
        .map(MappingSource::from)
        .collect();
    let configuration =
        Configuration::check(config.server.clone(), HandlerRegistry::builtin(), mappings).await?;
    tracing::info!(
        mappings = configuration.mappings().len(),
        max_redirect = configuration.settings().max_redirect,
        "Configuration checked"
    );

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(configuration), events));
    let server = HttpServer::new(dispatcher)?;

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match &config_path {
        Some(path) => watch(path)?,
        None => (None, mpsc::unbounded_channel().1),
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let shutdown = Arc::new(shutdown);
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            lifecycle::signals::shutdown_signal().await;
            shutdown.trigger();
        }
    });

    match config.server.protocol {
        Protocol::Http => {
            let listener = TcpListener::bind(config.server.bind_address()).await?;
            server.run(listener, config_updates, server_shutdown).await?;
        }
        Protocol::Https => {
            let ssl = config
                .server
                .ssl
                .as_ref()
                .ok_or("protocol https requires [server.ssl]")?;
            let tls = load_tls_config(ssl, &config.server.cwd).await?;
            let addr = tokio::net::lookup_host(config.server.bind_address())
                .await?
                .next()
                .ok_or("hostname did not resolve")?;
            server.run_tls(addr, tls, config_updates, server_shutdown).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

type Updates = mpsc::UnboundedReceiver<ServerConfig>;

fn watch(path: &Path) -> Result<(Option<notify::RecommendedWatcher>, Updates), notify::Error> {
    let (watcher, updates) = ConfigWatcher::new(path);
    Ok((Some(watcher.run()?), updates))
}
