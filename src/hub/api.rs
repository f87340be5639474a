//! HTTP API for the voice hub.
//!
//! Push ingestion (`/api/message`), the control surface (mute, queue,
//! history, observer, preview), status, and a Server-Sent Events stream
//! of lifecycle events for dashboards.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::message::{IncomingMessage, ValidationError};
use super::Hub;

// --- Request/Response types ---

#[derive(Deserialize)]
struct TargetRequest {
    #[serde(default)]
    target: String,
}

#[derive(Deserialize)]
struct ObserverRequest {
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct PreviewRequest {
    voice: Option<String>,
    speed: Option<f32>,
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            sequence: None,
            removed: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::ok("error")
        }
    }
}

/// Rejections and validation failures answer 400 with a JSON body.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(SimpleResponse::err(self.1))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self(StatusCode::BAD_REQUEST, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self(StatusCode::BAD_REQUEST, e.body_text())
    }
}

/// Build the axum router.
pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/api/message", post(handle_message))
        .route("/api/status", get(handle_status))
        .route("/api/mute", post(handle_mute))
        .route("/api/unmute", post(handle_unmute))
        .route("/api/queue/clear", post(handle_clear_queue))
        .route("/api/queue/{sequence}", delete(handle_remove_pending))
        .route("/api/history", get(handle_history))
        .route("/api/history/clear", post(handle_clear_history))
        .route("/api/observer", get(handle_observer_status).post(handle_set_observer))
        .route("/api/preview", post(handle_preview))
        .route("/api/events", get(handle_events))
        .with_state(hub)
}

/// Bind and serve the API as a background tokio task.
pub async fn start_api(hub: Hub, host: &str, port: u16) -> std::io::Result<()> {
    let app = router(hub);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Voice hub API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Voice hub API server error: {e}");
        }
    });
    Ok(())
}

// --- Handlers ---

async fn handle_message(
    State(hub): State<Hub>,
    body: Result<Json<IncomingMessage>, JsonRejection>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let Json(incoming) = body?;
    let admission = hub.submit(incoming)?;
    Ok(Json(SimpleResponse {
        sequence: Some(admission.sequence()),
        ..SimpleResponse::ok(if admission.is_update() { "updated" } else { "queued" })
    }))
}

async fn handle_status(State(hub): State<Hub>) -> Json<super::HubStatus> {
    Json(hub.status())
}

async fn handle_mute(
    State(hub): State<Hub>,
    body: Result<Json<TargetRequest>, JsonRejection>,
) -> Result<Json<super::state::MuteSnapshot>, ApiError> {
    let Json(req) = body?;
    Ok(Json(hub.set_mute(&req.target, true)?))
}

async fn handle_unmute(
    State(hub): State<Hub>,
    body: Result<Json<TargetRequest>, JsonRejection>,
) -> Result<Json<super::state::MuteSnapshot>, ApiError> {
    let Json(req) = body?;
    Ok(Json(hub.set_mute(&req.target, false)?))
}

async fn handle_clear_queue(State(hub): State<Hub>) -> Json<SimpleResponse> {
    let removed = hub.clear_queue();
    Json(SimpleResponse {
        removed: Some(removed),
        ..SimpleResponse::ok("cleared")
    })
}

async fn handle_remove_pending(
    State(hub): State<Hub>,
    Path(sequence): Path<u64>,
) -> Result<Json<SimpleResponse>, ApiError> {
    match hub.remove_pending(sequence) {
        Some(_) => Ok(Json(SimpleResponse {
            sequence: Some(sequence),
            ..SimpleResponse::ok("removed")
        })),
        None => Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("no pending message #{sequence}"),
        )),
    }
}

async fn handle_history(State(hub): State<Hub>) -> Json<Vec<super::state::HistoryEntry>> {
    Json(hub.history())
}

async fn handle_clear_history(
    State(hub): State<Hub>,
    body: Result<Json<TargetRequest>, JsonRejection>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let Json(req) = body?;
    let removed = hub.clear_history(&req.target)?;
    Ok(Json(SimpleResponse {
        removed: Some(removed),
        ..SimpleResponse::ok("cleared")
    }))
}

async fn handle_observer_status(State(hub): State<Hub>) -> Json<super::ObserverStatus> {
    Json(hub.observer_status())
}

async fn handle_set_observer(
    State(hub): State<Hub>,
    body: Result<Json<ObserverRequest>, JsonRejection>,
) -> Result<Json<super::ObserverStatus>, ApiError> {
    let Json(req) = body?;
    Ok(Json(hub.set_observer(req.enabled)))
}

async fn handle_preview(
    State(hub): State<Hub>,
    body: Result<Json<PreviewRequest>, JsonRejection>,
) -> Json<SimpleResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    // Fire-and-forget: the preview waits its turn behind queued speech.
    let _ = hub.preview(req.voice, req.speed, req.text);
    Json(SimpleResponse::ok("scheduled"))
}

async fn handle_events(State(hub): State<Hub>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = hub.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(e) => warn!("Failed to encode {} event: {e}", event.name()),
                },
                Err(RecvError::Lagged(n)) => debug!("Event stream lagged, {n} events dropped"),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
