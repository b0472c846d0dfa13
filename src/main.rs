use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relink::config::{AuthMode, Config};
use relink::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relink=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    match config.auth.mode {
        AuthMode::None => info!("🔓 Authentication is disabled - all callers are anonymous"),
        AuthMode::Jwt => info!("🔐 JWT authentication enabled"),
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let engine = Engine::connect(config).await?;
    info!("Database initialized successfully");

    let router = engine.router()?;
    let reclaimer = engine.start_reclaimer();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping reclamation scheduler...");
    reclaimer.stop().await;

    info!("Draining click buffer...");
    if !engine.shutdown().await {
        warn!("Click buffer was not fully drained before shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
