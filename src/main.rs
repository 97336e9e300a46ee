//! sxg_signer — fetches an upstream AMP document, decides whether it is
//! eligible to be packaged, transforms it, and emits a signed HTTP exchange
//! a downstream cache may serve on the origin's behalf.

use clap::Parser;
use sxg_signer::api::handlers::AppState;
use sxg_signer::api::build_router;
use sxg_signer::config::{AppConfig, FileConfig};
use sxg_signer::crypto::CertificateChain;
use sxg_signer::fetcher::ReqwestFetcher;
use sxg_signer::handler::Handler;
use sxg_signer::metrics::Metrics;
use sxg_signer::sxg::Cbor1SxgEncoder;
use sxg_signer::transform::AmpPreloadTransformer;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Version string including build timestamp for --version output.
fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("SXG_SIGNER_BUILD_TIME"),
        )
    })
}

/// sxg_signer — packages eligible AMP documents as signed HTTP exchanges.
#[derive(Parser, Debug)]
#[command(name = "sxg_signer")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("sxg_signer=trace,tower_http=trace")
        } else {
            EnvFilter::new("sxg_signer=info,tower_http=info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut file_config = FileConfig::load(cli.config.as_deref());
    if let Some(ref addr) = cli.listen {
        file_config.listen_addr = addr.parse()?;
    }

    info!(
        "Starting sxg_signer v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("SXG_SIGNER_BUILD_TIME"),
    );
    info!(listen_addr = %file_config.listen_addr, "listen address");
    info!(forward_proxy_host = %file_config.forward_proxy_host, "forward proxy host");
    info!(url_sets = file_config.url_sets.len(), "configured URL sets");

    let cert_path = file_config.cert_path.clone();
    let key_path = file_config.key_path.clone();
    let listen_addr = file_config.listen_addr;

    let config = AppConfig::compile(file_config)?;

    let cert_chain = match CertificateChain::load(&cert_path, &key_path) {
        Ok(chain) => Arc::new(chain),
        Err(err) => {
            warn!(
                error = %err,
                cert_path = %cert_path.display(),
                key_path = %key_path.display(),
                "failed to load certificate chain; packaging will error until a valid chain is provided"
            );
            return Err(Box::new(err));
        }
    };

    let metrics = Arc::new(Metrics::new());
    metrics.process_start_time_seconds.set(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    );
    metrics
        .build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    let fetcher = Arc::new(ReqwestFetcher::new(
        config.fetch_timeouts,
        config.max_body_bytes,
        config.tls_trust_anchor_path.as_deref(),
    )?);
    let transformer = Arc::new(AmpPreloadTransformer);
    let encoder = Arc::new(Cbor1SxgEncoder::new(cert_chain.clone()));

    let handler = Arc::new(Handler {
        config: config.clone(),
        cert_chain: cert_chain.clone(),
        fetcher,
        transformer,
        encoder,
        metrics: metrics.clone(),
    });

    let state = Arc::new(AppState {
        handler,
        config: config.clone(),
        cert_chain,
        metrics,
    });

    let app = build_router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(listen_addr).await?;
    info!("sxg_signer listening on http://{}", listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {
            warn!("received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            warn!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
