// blobgate - Caching gateway for content-addressed blob storage
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use blobgate::cli::Args;
use blobgate::config::AppConfig;
use blobgate::gateway::Gateway;
use blobgate::metrics::ProcessSampler;
use blobgate::server::create_router;
use blobgate::utils::logging;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let mut config = AppConfig::load_from(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    if args.check_config {
        println!("Configuration OK");
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    // Phase 2: Runtime sized by server.workers
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    // Phase 3: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting blobgate v{}", env!("CARGO_PKG_VERSION"));

    // Phase 4: Wire components
    let gateway = Gateway::build(&config)?;
    if gateway.cache.has_backing() && !gateway.cache.probe().await {
        warn!("Distributed cache backing unreachable at startup, serving local-only");
    }

    let sampler = if config.metrics.sampler_enabled {
        let interval = Duration::from_secs(config.metrics.sample_interval_seconds.max(1));
        Some(ProcessSampler::new(gateway.metrics.clone()).spawn(interval))
    } else {
        None
    };

    // Phase 5: Build and start HTTP server
    let app = create_router(gateway)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 6: Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sampler {
        handle.abort();
    }
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
