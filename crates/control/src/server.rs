use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use common::{Error, Request, Response, Result};

use crate::plane::ControlPlane;

pub fn router(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/command", post(command))
        .route("/healthz", get(healthz))
        .with_state(plane)
        .layer(TraceLayer::new_for_http())
}

/// The whole command protocol lives behind one endpoint: a tagged request
/// in, a uniform response out.
async fn command(
    State(plane): State<Arc<ControlPlane>>,
    Json(request): Json<Request>,
) -> Json<Response> {
    Json(plane.handle(request).await)
}

/// Liveness probe used by clients before trusting a discovery handle.
async fn healthz(State(plane): State<Arc<ControlPlane>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "phase": plane.phase().await.to_string(),
    }))
}

/// Serve the command transport until a shutdown command drains it.
/// The caller binds the listener so a bind failure surfaces as a startup
/// error, and port 0 works for tests.
pub async fn serve(plane: Arc<ControlPlane>, listener: TcpListener) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Transport(format!("listener has no local addr: {e}")))?;
    info!(%addr, "Command transport listening");

    let app = router(plane.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { plane.shutdown_requested().await })
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}
