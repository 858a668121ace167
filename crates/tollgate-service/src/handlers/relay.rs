//! Metered relay handler.
//!
//! The handler parses just enough of the request body to bill it (the model
//! name), runs it through the billing gate, and forwards the upstream
//! response to the client byte for byte. Whether the response is streamed is
//! decided by the upstream's content type, not by what the request asked
//! for: an upstream that answers a `stream: true` request with a plain JSON
//! body still gets buffered, extracted, and billed. Deferred billing work
//! for streamed responses is spawned before the response is handed off; it
//! completes once the client has drained (or abandoned) the stream.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;

use tollgate_core::BillingError;
use tollgate_meter::{BoxError, RelayBody, RelayResponse, RequestContext};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Relay a billable API request through the billing gate.
///
/// Only paths ending in a configured billable suffix are forwarded; the
/// rest 404 without touching the upstream.
pub async fn relay(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    auth: AuthUser,
    body: Bytes,
) -> Result<Response, ApiError> {
    let rel_path = format!("/{path}");
    if !state
        .config
        .billable_suffixes
        .iter()
        .any(|suffix| rel_path.ends_with(suffix.as_str()))
    {
        return Err(ApiError::NotFound(format!(
            "no billable endpoint at /api{rel_path}"
        )));
    }

    let doc: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
    let model = doc
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing 'model' field".into()))?
        .to_string();

    let mut ctx = RequestContext::new(auth.user_id, model);
    ctx.min_credits = state.config.min_credits;

    let upstream_state = Arc::clone(&state);
    let mut relayed = state
        .gate
        .intercept(ctx, move || relay_upstream(upstream_state, rel_path, body))
        .await?;

    relayed.spawn_deferred();
    into_axum_response(relayed)
}

/// Forward the request body to the upstream API.
async fn relay_upstream(
    state: Arc<AppState>,
    rel_path: String,
    body: Bytes,
) -> tollgate_core::Result<RelayResponse> {
    let url = format!("{}{}", state.config.upstream_url, rel_path);
    let mut request = state
        .client
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body);
    if let Some(key) = &state.config.upstream_api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| BillingError::Upstream(e.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    // Only a genuine SSE response goes down the streaming path. Everything
    // else is buffered so the usage extractor sees the whole body.
    let is_event_stream = content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("text/event-stream"));

    if is_event_stream && response.status().is_success() {
        let stream = response
            .bytes_stream()
            .map_err(|e| Box::new(e) as BoxError)
            .boxed();
        Ok(RelayResponse::streaming(status, content_type, stream))
    } else {
        // Upstream error bodies are buffered too; they carry no usage, so
        // nothing is billed for them.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BillingError::Upstream(e.to_string()))?;
        Ok(RelayResponse::buffered(status, content_type, bytes))
    }
}

/// Convert a relayed response into an Axum response.
fn into_axum_response(relayed: RelayResponse) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = &relayed.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }

    match relayed.body {
        RelayBody::Buffered(bytes) => builder.body(Body::from(bytes)),
        RelayBody::Stream(stream) => builder.body(Body::from_stream(stream)),
    }
    .map_err(|e| ApiError::Internal(e.to_string()))
}
