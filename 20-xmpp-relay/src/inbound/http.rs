use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay::RelaySender;

pub fn router(queue: RelaySender) -> Router {
    Router::new()
        .route("/", get(enqueue_text))
        .with_state(queue)
}

/// The first `text` value, forwarded verbatim. A missing parameter relays
/// an empty string.
fn first_text(params: Vec<(String, String)>) -> String {
    params
        .into_iter()
        .find_map(|(key, value)| (key == "text").then_some(value))
        .unwrap_or_default()
}

/// Waits for queue space, so a stalled relay holds the request open.
async fn enqueue_text(
    State(queue): State<RelaySender>,
    Query(params): Query<Vec<(String, String)>>,
) -> StatusCode {
    let text = first_text(params);
    debug!(len = text.len(), "received message at HTTP interface");
    match queue.enqueue(text).await {
        Ok(()) => StatusCode::OK,
        Err(error) => {
            warn!(%error, "dropping HTTP message");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Serves the relay endpoint until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    queue: RelaySender,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP interface listening on {addr}");
    }

    axum::serve(listener, router(queue))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
