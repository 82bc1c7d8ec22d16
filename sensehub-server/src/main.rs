use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use confique::Config;
use tokio::{net::TcpListener, signal, sync::RwLock};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod route;

/// The reading served until a device reports in.
const INITIAL_SENSOR_VALUE: f64 = 0.0;

#[derive(Debug, Parser)]
#[command(name = "sensehub-server")]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Path to config file")]
    config_path: Option<String>,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the server
    Serve,
}

#[derive(Config, Debug)]
struct Conf {
    /// Port to listen on
    #[config(default = 5000)]
    port: u16,

    /// Bind address
    #[config(default = "0.0.0.0")]
    address: IpAddr,
}

fn config(path: &str) -> anyhow::Result<Conf> {
    Conf::builder()
        .env()
        .file(path)
        .load()
        .map_err(|e| e.into())
}

#[derive(Clone, Debug)]
pub(crate) struct AppState {
    pub sensor: Arc<RwLock<f64>>,
    pub ws_graceful_shutdown: WebsocketGraceful,
}

#[derive(Clone, Debug)]
pub(crate) struct WebsocketGraceful {
    pub token: CancellationToken,
    pub tracker: TaskTracker,
}

impl AppState {
    fn new() -> Self {
        AppState {
            sensor: Arc::new(RwLock::new(INITIAL_SENSOR_VALUE)),
            ws_graceful_shutdown: WebsocketGraceful {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
        }
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(route::health))
        .route("/status", get(route::get_status))
        .route("/update", post(route::update))
        .route("/ws", get(route::sensor_ws))
        .layer((
            TraceLayer::new_for_http(),
            // Prevent requests to hang forever
            TimeoutLayer::new(Duration::from_secs(60)),
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    trace!("using command line arguments {:?}", cli);

    let config = config(&cli.config_path.unwrap_or("config.toml".to_owned()))?;
    trace!("using config {:?}", config);

    match cli.commands {
        Commands::Serve => {
            let addr = SocketAddr::from((config.address, config.port));
            info!("listening on {addr}");
            let listener = TcpListener::bind(addr).await?;

            let state = AppState::new();

            axum::serve(listener, app(state.clone()))
                .with_graceful_shutdown(shutdown_signal(state.ws_graceful_shutdown.token.clone()))
                .await?;

            let ws_tracker = state.ws_graceful_shutdown.tracker.clone();
            ws_tracker.close();

            trace!("waiting {} websocket connection shutdown", ws_tracker.len());
            ws_tracker.wait().await;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                #[cfg(debug_assertions)]
                let default_log_level = format!(
                    "{}=debug,tower_http=debug,axum=trace",
                    env!("CARGO_CRATE_NAME")
                )
                .into();

                #[cfg(not(debug_assertions))]
                let default_log_level = format!(
                    "{}=info,tower_http=info,axum=info",
                    env!("CARGO_CRATE_NAME")
                )
                .into();

                default_log_level
            }),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();
}

async fn shutdown_signal(ws_token: CancellationToken) {
    let _ws_shutdown_guard = ws_token.drop_guard();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
