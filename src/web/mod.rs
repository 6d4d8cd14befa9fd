pub mod handlers;
pub mod routes;
pub mod state;

use crate::config::WebConfig;
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Serves the JSON API until the process is stopped.
pub async fn run_server(
    config: WebConfig,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = routes::api_routes().with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on http://{}", address);

    axum::serve(listener, app).await?;
    Ok(())
}
