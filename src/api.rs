use axum::Router;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{media::types::CodecFamily, pool::SharedPool};

#[derive(Clone)]
pub struct AppState {
    pub pool: SharedPool,
    pub default_codec: Option<CodecFamily>,
}

pub(crate) fn start_api_server(
    state: AppState,
    listen: String,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .nest("/session", crate::handler::session::session_router())
            .nest("/system", crate::handler::system::system_router())
            .with_state(state);

        let listener = match TcpListener::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API server bind {} failed: {}", listen, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", listen);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}
