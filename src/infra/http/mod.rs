//! Revalidation receiver.
//!
//! `POST /api/revalidate` accepts the signed tag list the dispatcher sends
//! and purges the matching entries from the local [`ContentCache`].
//! `GET /health` reports whether the store answers.

mod error;
mod middleware;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use middleware::{REQUEST_ID_HEADER, RequestContext, log_responses, set_request_context};

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::application::error::ErrorReport;
use crate::cache::ContentCache;
use crate::infra::revalidate::RevalidatePayload;
use crate::infra::signature::{SIGNATURE_HEADER, verify_signature};

pub const REVALIDATE_PATH: &str = "/api/revalidate";
pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
pub struct ReceiverState {
    cache: Arc<ContentCache>,
    secret: Arc<str>,
    session_token_hash: [u8; 32],
}

impl ReceiverState {
    pub fn new(cache: Arc<ContentCache>, secret: &str, session_token: &str) -> Self {
        Self {
            cache,
            secret: Arc::from(secret),
            session_token_hash: Sha256::digest(session_token.as_bytes()).into(),
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }
}

#[derive(Debug, Serialize)]
pub struct RevalidateResponse {
    pub revalidated: bool,
    pub tags: Vec<String>,
    pub purged: u64,
}

pub fn build_router(state: ReceiverState) -> Router {
    Router::new()
        .route(REVALIDATE_PATH, post(revalidate))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn revalidate(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RevalidateResponse>, ApiError> {
    authorize(&state, &headers)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::invalid_signature(format!("missing `{SIGNATURE_HEADER}` header")))?;
    verify_signature(&state.secret, &body, signature)
        .map_err(|err| ApiError::invalid_signature(err.to_string()))?;

    let payload: RevalidatePayload =
        serde_json::from_slice(&body).map_err(|err| ApiError::invalid_body(err.to_string()))?;

    let mut purged = 0;
    for tag in &payload.tags {
        purged += state
            .cache
            .purge_tag(tag)
            .await
            .map_err(|err| ApiError::store_unavailable("infra::http::revalidate", &err))?;
    }

    info!(
        target = "resort_cache::http::revalidate",
        tags = ?payload.tags,
        purged,
        "Tags revalidated"
    );

    Ok(Json(RevalidateResponse {
        revalidated: true,
        tags: payload.tags,
        purged,
    }))
}

fn authorize(state: &ReceiverState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(ApiError::unauthorized)?;

    let presented: [u8; 32] = Sha256::digest(token.as_bytes()).into();
    if presented[..].ct_eq(&state.session_token_hash[..]).unwrap_u8() == 0 {
        return Err(ApiError::unauthorized());
    }
    Ok(())
}

async fn health(State(state): State<ReceiverState>) -> Response {
    match state.cache.store().ping().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
