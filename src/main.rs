use anyhow::Result;
use textgen_server::api;
use textgen_server::app::AppState;
use textgen_server::types::config::ServerConfig;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    config.validate()?;
    let addr = config.bind_addr();

    let state = AppState::new(config);
    let loader = state.spawn_model_loader();

    // Stop serving if the model cannot be loaded
    let (failure_tx, failure_rx) = watch::channel::<Option<String>>(None);
    tokio::spawn(async move {
        let failure = match loader.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        let _ = failure_tx.send(Some(failure));
    });

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(failure_rx.clone()))
        .await?;

    tracing::info!("Shutting down");
    if let Some(reason) = failure_rx.borrow().clone() {
        anyhow::bail!("Failed to load model: {}", reason);
    }
    Ok(())
}

async fn shutdown_signal(mut load_failure: watch::Receiver<Option<String>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let failed = async move {
        while load_failure.changed().await.is_ok() {
            if load_failure.borrow().is_some() {
                return;
            }
        }
        // Loader finished successfully and dropped the sender
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutdown signal received, gracefully shutting down..."),
        _ = failed => tracing::error!("Model failed to load, stopping server"),
    }
}
