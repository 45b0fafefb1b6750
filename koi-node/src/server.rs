use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{debug, warn};

use koi_net::error::NetError;
use koi_net::network::response::ResponseHandler;
use koi_net::protocol::{
    ErrorResponse, EventsPayload, FetchBundles, FetchManifests, FetchRids, PollEvents,
    ProtocolPayload, SignedEnvelope, BROADCAST_EVENTS_PATH, FETCH_BUNDLES_PATH,
    FETCH_MANIFESTS_PATH, FETCH_RIDS_PATH, POLL_EVENTS_PATH, TIMESTAMP_HEADER,
};
use koi_net::secure::SecureLayer;

/// Shared state behind the five protocol endpoints.
#[derive(Clone)]
pub struct ServerState {
    pub secure: Arc<SecureLayer>,
    pub response: Arc<ResponseHandler>,
}

/// Protocol rejections surface as 400 with `{"error": <kind>}`; anything
/// else is a 500.
pub struct ApiError(NetError);

impl From<NetError> for ApiError {
    fn from(err: NetError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            NetError::Protocol(kind) => {
                debug!(%kind, "rejecting request");
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: kind })).into_response()
            }
            err => {
                warn!(%err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Build the protocol router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route(BROADCAST_EVENTS_PATH, post(broadcast_events))
        .route(POLL_EVENTS_PATH, post(poll_events))
        .route(FETCH_RIDS_PATH, post(fetch_rids))
        .route(FETCH_MANIFESTS_PATH, post(fetch_manifests))
        .route(FETCH_BUNDLES_PATH, post(fetch_bundles))
        .with_state(state)
}

/// Timestamp and envelope checks shared by every endpoint.
fn admit<P: ProtocolPayload>(
    state: &ServerState,
    headers: &HeaderMap,
    envelope: &SignedEnvelope<P>,
) -> Result<(), ApiError> {
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|value| value.to_str().ok());
    state.secure.check_timestamp(timestamp)?;
    state.secure.verify_envelope(envelope)?;
    Ok(())
}

async fn broadcast_events(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(envelope): Json<SignedEnvelope<EventsPayload>>,
) -> Result<StatusCode, ApiError> {
    admit(&state, &headers, &envelope)?;
    state
        .response
        .broadcast_events(&envelope.source_node, envelope.payload);
    Ok(StatusCode::OK)
}

async fn poll_events(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(envelope): Json<SignedEnvelope<PollEvents>>,
) -> Result<Response, ApiError> {
    admit(&state, &headers, &envelope)?;
    let payload = state.response.poll_events(envelope.payload);
    let signed = state
        .secure
        .create_envelope(payload, &envelope.source_node)?;
    Ok(Json(signed).into_response())
}

async fn fetch_rids(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(envelope): Json<SignedEnvelope<FetchRids>>,
) -> Result<Response, ApiError> {
    admit(&state, &headers, &envelope)?;
    let payload = state.response.fetch_rids(envelope.payload)?;
    let signed = state
        .secure
        .create_envelope(payload, &envelope.source_node)?;
    Ok(Json(signed).into_response())
}

async fn fetch_manifests(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(envelope): Json<SignedEnvelope<FetchManifests>>,
) -> Result<Response, ApiError> {
    admit(&state, &headers, &envelope)?;
    let payload = state.response.fetch_manifests(envelope.payload)?;
    let signed = state
        .secure
        .create_envelope(payload, &envelope.source_node)?;
    Ok(Json(signed).into_response())
}

async fn fetch_bundles(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(envelope): Json<SignedEnvelope<FetchBundles>>,
) -> Result<Response, ApiError> {
    admit(&state, &headers, &envelope)?;
    let payload = state.response.fetch_bundles(envelope.payload)?;
    let signed = state
        .secure
        .create_envelope(payload, &envelope.source_node)?;
    Ok(Json(signed).into_response())
}
