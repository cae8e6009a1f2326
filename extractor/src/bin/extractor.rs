use std::process;
use std::sync::Arc;

use clap::Parser;
use extractor::config::Config;
use extractor::orchestrator::extract;
use extractor::peer::PeerClient;
use extractor::postgres_sink::PostgresSink;
use extractor::reflect::Resolver;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("{err}");
        eprintln!("{err}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::from_default_env()))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    PrometheusBuilder::new()
        .install()
        .map_err(|err| anyhow::anyhow!("failed to install metrics recorder: {err}"))?;

    info!(peer = %cfg.peer_address, "extraction engine starting");

    let peer = Arc::new(PeerClient::connect(&cfg.peer_address, cfg.insecure, cfg.max_recv_msg_size).await?);
    let resolver = Arc::new(Resolver::bootstrap(&peer).await?);

    let sink = PostgresSink::connect(&cfg.database_url).await?;
    sink.migrate().await?;
    let sink: Arc<dyn extractor::sink::Sink> = Arc::new(sink);

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("SIGINT received, shutting down");
                }
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
            }
        }
        shutdown_cancel.cancel();
    });

    extract(&cfg, peer, resolver, sink, &cancel).await?;

    info!("extraction engine exiting gracefully");
    Ok(())
}
