use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_menu::config::{self, AppConfig};
use voice_menu::resources::MediaResourceCatalog;
use voice_menu::session::SessionManager;
use voice_menu::sip::SipServer;
use voice_menu::video::{OpenH264Factory, SceneDrawer};
use voice_menu::web::{self, AppState};
use voice_menu::webrtc::RtcPeerTransportFactory;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// voice-menu command line arguments
#[derive(Parser, Debug)]
#[command(name = "voice-menu")]
#[command(version, about = "Answers SIP and WebRTC calls with a synthetic voice menu", long_about = None)]
struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// SIP UDP bind address, e.g. 0.0.0.0:5060 (overrides config)
    #[arg(long, value_name = "ADDRESS")]
    sip_bind: Option<String>,

    /// Directory holding the audio clips and the font (overrides config)
    #[arg(short = 'r', long, value_name = "DIR")]
    resources: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting voice-menu v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(args.config.as_deref())?;
    apply_cli_overrides(&mut config, &args);
    config.validate()?;
    let config = Arc::new(config);

    // Resources are read once; a missing clip or font is fatal
    let catalog = Arc::new(MediaResourceCatalog::load(&config.resources)?);
    tracing::info!("Media resources loaded from {}", config.resources.dir.display());

    let drawer = Arc::new(SceneDrawer::new(catalog.clone(), &config.video));
    let sessions = Arc::new(SessionManager::new(
        config.clone(),
        catalog,
        drawer,
        Arc::new(RtcPeerTransportFactory),
        Arc::new(OpenH264Factory),
    ));

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    if config.sip.enabled {
        let server = SipServer::bind(config.sip.clone(), sessions.clone()).await?;
        tasks.spawn(server.run(cancel.clone()));
    }

    if config.web.enabled {
        let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP bind address: {}", e))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server listening on http://{}", addr);

        let app = web::create_router(Arc::new(AppState::new(sessions.clone())));
        let shutdown = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    if tasks.is_empty() {
        anyhow::bail!("Both HTTP and SIP signaling are disabled");
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        }
        _ = tasks.join_next() => {
            tracing::warn!("Signaling server stopped unexpectedly");
        }
    }

    cancel.cancel();
    sessions.close_all().await;
    while tasks.join_next().await.is_some() {}

    tracing::info!("voice-menu stopped");
    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(address) = &args.address {
        config.web.bind_address = address.clone();
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }
    if let Some(bind) = &args.sip_bind {
        config.sip.bind_address = bind.clone();
    }
    if let Some(dir) = &args.resources {
        config.resources.dir = dir.clone();
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "voice_menu=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "voice_menu=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "voice_menu=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "voice_menu=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "voice_menu=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "voice_menu=trace,tower_http=debug,webrtc=debug",
    };

    // RUST_LOG takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
