use std::sync::Arc;

use queuectl::{
    models::{AppState, Error},
    services,
};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "queuectl=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::new().await?;
    let counts = services::JobQueue::from_state(&state).counts().await?;
    tracing::info!({ instance_id = state.instance_id.as_str() }, "job counts {:?}", counts);

    tokio::join!(start_workers(&state), shutdown_signal(Arc::clone(&state)));

    state.pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn start_workers(state: &Arc<AppState>) {
    let pool = services::WorkerPool::new(Arc::clone(state));
    if let Err(err) = pool.run().await {
        tracing::error!("worker pool failed {}", err);
        state.shutdown_token.cancel();
    }
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install signal handler {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = state.shutdown_token.cancelled() => {},
    }
    state.shutdown_token.cancel();
    tracing::warn!("signal received, starting graceful shutdown");
}
