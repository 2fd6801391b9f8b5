use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kairos_core::KairosConfig;
use kairos_dispatcher::{Dispatcher, DispatcherOptions};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod app;
mod http;

/// Distributed action scheduler: serves the dispatcher over HTTP.
#[derive(Debug, Parser)]
#[command(name = "kairos-gateway", version)]
struct Cli {
    /// Host this node is known by; also the bind address.
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Home directory holding saved/, output/ and log/.
    #[arg(long)]
    home: Option<String>,

    /// Config file (defaults to $KAIROS_CONFIG, then ~/.kairos/kairos.toml).
    #[arg(long)]
    config: Option<String>,
}

// The dispatcher owns a blocking HTTP client, which must not be built or
// dropped on an async worker; main stays synchronous and drives the runtime
// by hand.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // load config: --config > KAIROS_CONFIG env > ~/.kairos/kairos.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("KAIROS_CONFIG").ok());
    let (mut config, load_error) = match KairosConfig::load(config_path.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (KairosConfig::default(), Some(e)),
    };
    if let Some(host) = cli.host {
        config.node.host = host;
    }
    if let Some(port) = cli.port {
        config.node.port = port;
    }
    if let Some(home) = cli.home {
        config.home.dir = home;
    }
    config.ensure_home()?;

    init_tracing(&config)?;
    if let Some(e) = load_error {
        warn!("Config load failed ({}), using defaults", e);
    }

    let dispatcher = Dispatcher::new(DispatcherOptions::from_config(&config));
    if config.dispatcher.autoload {
        match dispatcher.restore() {
            Ok(true) => info!("restored saved/current.json"),
            Ok(false) => info!("no saved state, starting empty"),
            Err(e) => warn!(error = %e, "restore failed, starting empty"),
        }
    }
    dispatcher.start()?;

    let addr: SocketAddr = format!("{}:{}", config.node.host, config.node.port).parse()?;
    let state = Arc::new(app::AppState::new(config, dispatcher.clone()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let served = runtime.block_on(serve(addr, state));
    drop(runtime);

    dispatcher.shutdown();
    served
}

async fn serve(addr: SocketAddr, state: Arc<app::AppState>) -> anyhow::Result<()> {
    let router = app::build_router(state);
    info!("Kairos gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Kairos gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Log to stdout and, without colours, to `<home>/log/kairos.log`.
fn init_tracing(config: &KairosConfig) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "kairos_gateway=info,kairos_dispatcher=info,kairos_scheduler=info,tower_http=debug".into()
        })
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_dir().join("kairos.log"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter()))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(filter()),
        )
        .init();
    Ok(())
}
