use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::pipeline::{self, PipelineError};

/// JSON body of every non-feed response: `{"message": ..., "ok": ...}`.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub message: &'static str,
    pub ok: bool,
}

impl StatusBody {
    pub fn failure(message: &'static str) -> Self {
        Self { message, ok: false }
    }
}

pub async fn bulletin_feed(State(state): State<AppState>) -> Result<Response, PipelineError> {
    let body = pipeline::run(state.source.as_ref(), state.options).await?;
    Ok(([(header::CONTENT_TYPE, "text/xml")], body).into_response())
}

pub async fn livez() -> Response {
    let msg = serde_json::json!({"status": "ok"});
    (StatusCode::OK, Json(msg)).into_response()
}

pub async fn not_found_handler() -> Response {
    (StatusCode::NOT_FOUND, Json(StatusBody::failure("Not Found"))).into_response()
}

/// Upstream problems are a bad gateway; our own serialization failing is ours.
/// Error detail goes to the log only.
impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Feed request failed");
        let (status, message) = match self {
            PipelineError::Fetch(_) | PipelineError::Parse(_) => {
                (StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
            PipelineError::Serialize(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        (status, Json(StatusBody::failure(message))).into_response()
    }
}
