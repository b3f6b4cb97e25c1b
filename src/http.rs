use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::Path,
    http::{Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use futures::stream::Stream;
use hyper::Server;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::envelope::EnvelopeSubmission;
use crate::error::PipedashError;
use crate::metrics;
use crate::relay::RelayHub;

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "pipedash",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registered pipeline sessions, oldest connection first
async fn sessions(Extension(hub): Extension<RelayHub>) -> impl IntoResponse {
    Json(hub.sessions())
}

/// The recent-update ring, oldest first, for late-joining dashboards
async fn recent_updates(Extension(hub): Extension<RelayHub>) -> impl IntoResponse {
    Json(hub.recent())
}

/// Live stream of relay updates as server-sent events
async fn events(
    Extension(hub): Extension<RelayHub>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    metrics::feed::subscription_opened();
    let receiver = hub.subscribe();

    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(update) => {
                    let json = match serde_json::to_string(&update) {
                        Ok(json) => json,
                        Err(_) => continue,
                    };
                    metrics::feed::update_streamed();
                    return Some((Ok(Event::default().event("update").data(json)), receiver));
                }
                // Fell behind the broadcast ring; skip ahead and keep going.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Accept a wire envelope from the dashboard and queue it for the pipeline
/// registered under `uuid`
async fn push(
    Extension(hub): Extension<RelayHub>,
    Path(uuid): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let envelope = match EnvelopeSubmission::from_value(body)
        .and_then(EnvelopeSubmission::validate)
    {
        Ok(envelope) => envelope,
        Err(error) => return (StatusCode::BAD_REQUEST, error.to_string()).into_response(),
    };

    match hub.push(&uuid, envelope) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(error @ PipedashError::UnknownSession(_)) => {
            (StatusCode::NOT_FOUND, error.to_string()).into_response()
        }
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
    }
}

/// Build the dashboard feed with all routes
pub fn create_app(hub: RelayHub) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/sessions", get(sessions))
        .route("/updates/recent", get(recent_updates))
        .route("/push/:uuid", post(push))
        .layer(Extension(hub))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the dashboard feed on the given address
pub async fn start_server(hub: RelayHub, addr: SocketAddr) -> crate::error::Result<()> {
    let app = create_app(hub);

    println!("🚀 Dashboard feed running on http://{addr}");
    println!("💚 Health check: http://{addr}/health");
    println!("📡 Event stream: http://{addr}/events");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
