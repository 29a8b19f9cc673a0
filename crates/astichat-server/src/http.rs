//! HTTP surface: authoritative time and bearer tokens.

use std::sync::Arc;

use astichat::storage::Storage;
use astichat::{Body, Error, TimeSource, TokenService};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone)]
pub struct HttpState {
    tokens: TokenService<dyn Storage>,
    time: Arc<dyn TimeSource>,
}

impl HttpState {
    pub fn new(storage: Arc<dyn Storage>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            tokens: TokenService::new(storage),
            time,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateTokenRequest {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/now", get(now_handler))
        .route("/token", post(token_handler))
        .route("/token/validate", post(validate_token_handler))
        .with_state(state)
}

async fn now_handler(State(state): State<HttpState>) -> Response {
    match state.time.now() {
        Ok(now) => (StatusCode::OK, Json(now)).into_response(),
        Err(err) => {
            warn!(error = %err, "cannot read server time");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Errors travel back as error bodies so the client surfaces them as remote
/// errors; the status code only classifies them.
async fn token_handler(State(state): State<HttpState>, Json(body): Json<Body>) -> Response {
    let now = match state.time.now() {
        Ok(now) => now,
        Err(err) => return body_error(StatusCode::INTERNAL_SERVER_ERROR, &err),
    };
    match state.tokens.issue(&body, now).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(err) => {
            warn!(error = %err, username = %body.username(), "token request rejected");
            body_error(status_for(&err), &err)
        }
    }
}

async fn validate_token_handler(
    State(state): State<HttpState>,
    Json(request): Json<ValidateTokenRequest>,
) -> Response {
    let result = match state.time.now() {
        Ok(now) => state.tokens.validate(&request.username, &request.token, now).await,
        Err(err) => Err(err),
    };
    let response = match result {
        Ok(()) => ValidateTokenResponse {
            valid: true,
            error: None,
        },
        Err(err) => {
            warn!(error = %err, username = %request.username, "token validation failed");
            ValidateTokenResponse {
                valid: false,
                error: Some(err.to_string()),
            }
        }
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Stale { .. }
        | Error::Remote(_)
        | Error::EmptyBody
        | Error::MarkerMismatch { .. }
        | Error::Decryption(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn body_error(status: StatusCode, err: &Error) -> Response {
    (status, Json(Body::error(err.to_string()))).into_response()
}
