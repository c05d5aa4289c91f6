//! panelcast-broker: WebSocket signaling broker for panel sessions.
//!
//! Accepts WebSocket connections from capture and viewer peers, keeps the
//! peer directory and forwards negotiation messages between them. Media
//! never passes through the broker.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use panelcast_broker::{tls, BrokerError, BrokerServer};
use panelcast_config::{LogLevel, PanelcastConfig};

#[derive(Parser)]
#[command(name = "panelcast-broker", about = "Signaling broker for panelcast peers")]
struct Args {
    /// Config file (defaults to the platform config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// PEM certificate chain for TLS.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key for TLS.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, value_enum)]
    log_level: Option<CliLogLevel>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<CliLogLevel> for LogLevel {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Trace => LogLevel::Trace,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Error => LogLevel::Error,
        }
    }
}

impl Args {
    /// Apply command-line overrides on top of the file config.
    fn apply(&self, config: &mut PanelcastConfig) {
        if let Some(bind) = &self.bind {
            config.broker.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(cert) = &self.cert {
            config.broker.tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = &self.key {
            config.broker.tls.key_path = Some(key.clone());
        }
        if let Some(level) = self.log_level {
            config.logging.level = level.into();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match panelcast_config::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("panelcast-broker: {e}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    let directive = config.logging.level.as_directive();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("panelcast_broker={directive},panelcast_config={directive}").into()
            }),
        )
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Broker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: PanelcastConfig) -> Result<(), BrokerError> {
    let acceptor = tls::load_acceptor(&config.broker.tls)?;
    let addr = config.broker.listen_addr();
    let server = BrokerServer::bind(&addr, acceptor).await?;
    let local = server.local_addr()?;
    let scheme = if server.is_tls() { "wss" } else { "ws" };
    let broker = server.handle();

    tracing::info!("panelcast-broker listening on {scheme}://{local}");

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            if let Ok(stats) = broker.stats().await {
                tracing::info!(
                    connected = stats.connected,
                    accepted = stats.router.connected_total,
                    routed = stats.router.routed,
                    broadcasts = stats.router.broadcasts,
                    dropped = stats.router.dropped_unknown_target,
                    malformed = stats.router.malformed,
                    rejected = stats.router.rejected,
                    "Shutting down"
                );
            }
        }
    }
    Ok(())
}
