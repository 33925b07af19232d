// src/api.rs
//! HTTP surface: a blocking JSON endpoint and a streaming (SSE) assistant endpoint,
//! both thin wrappers over [`Pipeline::run`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info};

use crate::config::AppSettings;
use crate::error::{RequestError, RunError};
use crate::pipeline::Pipeline;
use crate::progress::{ChannelSink, ProgressEvent, TracingSink};
use crate::report::Report;
use crate::request::AnalysisRequest;

const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn router(state: AppState, app: &AppSettings) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        .route("/api/analyze", post(analyze))
        .route("/api/assist", post(assist))
        .layer(cors_layer(&app.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::very_permissive();
    }
    let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Run errors as `{error, kind}` with a status derived from the kind.
pub struct ApiError(RunError);

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rej: JsonRejection) -> Self {
        Self(RunError::Request(RequestError::Body(rej.body_text())))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            "invalid_request" => StatusCode::BAD_REQUEST,
            "unsupported_market" => StatusCode::UNPROCESSABLE_ENTITY,
            "market_not_found" => StatusCode::NOT_FOUND,
            "llm_timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (self.status(), Json(body)).into_response()
    }
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Json<Report>, ApiError> {
    let Json(req) = payload?;
    info!(target: "api", url = %req.market_url, depth = req.depth.as_str(), "analyze");
    let report = state.pipeline.run(&req, &TracingSink).await?;
    Ok(Json(report))
}

/// Cancels the run when the client goes away and the stream is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Body is either a JSON request object or free text holding a market URL.
/// Emits `RECEIVED`, the pipeline's progress events, then `COMPLETE` or `ERROR`.
async fn assist(
    State(state): State<AppState>,
    body: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let req = AnalysisRequest::from_prompt(&body);
    info!(target: "api", url = %req.market_url, depth = req.depth.as_str(), "assist");

    let (tx, rx) = mpsc::channel::<ProgressEvent>(STREAM_BUFFER);
    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move {
        let sink = ChannelSink::new(tx.clone());
        let _ = tx
            .send(ProgressEvent::text("RECEIVED", req.market_url.clone()))
            .await;
        let last = match pipeline.run(&req, &sink).await {
            Ok(_) => ProgressEvent::text("COMPLETE", "done"),
            Err(e) => ProgressEvent::json("ERROR", json!({ "error": e.to_string(), "kind": e.kind() })),
        };
        if tx.send(last).await.is_err() {
            debug!(target: "api", "assist client disconnected before completion");
        }
    });

    let events = stream::unfold((rx, AbortOnDrop(task)), |(mut rx, guard)| async move {
        let ev = rx.recv().await?;
        let sse = Event::default()
            .event(ev.name())
            .data(ev.data().replace('\r', ""));
        Some((Ok(sse), (rx, guard)))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketFetchError;

    #[test]
    fn error_kinds_map_to_statuses() {
        let bad = ApiError(RunError::Request(RequestError::EmptyUrl));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let unsupported = ApiError(RunError::Market(MarketFetchError::UnsupportedHost(
            "example.com".into(),
        )));
        assert_eq!(unsupported.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = ApiError(RunError::Request(RequestError::Body("depth".into())));
        assert_eq!(body.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body.0.kind(), "invalid_request");
    }

    #[test]
    fn explicit_origins_build_a_restricted_layer() {
        // smoke: neither path panics on odd input
        let _ = cors_layer(&["https://app.example".into(), "not a header\n".into()]);
        let _ = cors_layer(&["*".into()]);
    }
}
