//! Webhook endpoint for Git providers and manual rebuilds.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::http::header::CONTENT_LENGTH;
use axum::routing::post;
use axum::{Json, Router};
use buildq_config::ServerConfig;
use buildq_core::event::{EventKind, PushEvent};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::{Sha256, Sha512};
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::ApiError;

/// Hex HMAC-SHA512 of the raw body.
pub const HOOK_SIGNATURE_HEADER: &str = "x-hook-signature";
/// GitHub style `sha256=<hex HMAC-SHA256>`.
pub const HUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/webhook/", post(webhook))
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let server = &state.config.server;
    let body = read_body(&headers, body, server.max_body_bytes).await?;
    verify_signature(server, &headers, &body)?;

    let kind = EventKind::from_header(header(&headers, EVENT_HEADER));
    info!(event = %kind, "Received webhook");

    match kind {
        EventKind::Ping => Ok((StatusCode::OK, Json(json!({ "result": "ok" })))),
        EventKind::Push | EventKind::Rebuild => handle_push(&state, &body).await,
        EventKind::Other(name) => {
            warn!(event = %name, "Unhandled event type");
            Ok(ignored())
        }
    }
}

fn ignored() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "result": "ignored" })))
}

/// Queue a build for every repository the push applies to.
///
/// If some targets fail to queue, the response is a 500 listing both the
/// queued ids and the failed repositories.
async fn handle_push(
    state: &AppState,
    body: &[u8],
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;
    let push = PushEvent::from_payload(&payload)
        .ok_or_else(|| ApiError::BadRequest("Invalid push payload".to_string()))?;

    if push.is_deletion() {
        info!(repository = %push.repository, git_ref = %push.git_ref, "Ignoring ref deletion");
        return Ok(ignored());
    }

    let targets = state.config.build_targets(&push.repository);
    if targets.is_empty() {
        info!(repository = %push.repository, "Push for unconfigured repository");
        return Ok(ignored());
    }

    let mut queued = Vec::with_capacity(targets.len());
    let mut failed = Vec::new();
    for target in &targets {
        info!(
            repository = %target,
            pushed = %push.repository,
            pusher = %push.pusher_name,
            git_ref = %push.git_ref,
            manual = push.is_manual(),
            "Queuing build"
        );
        match state.store.enqueue(&push.job_for(target)).await {
            Ok(id) => queued.push(id.to_string()),
            Err(e) => {
                error!(repository = %target, error = %e, "Failed to queue build");
                if targets.len() == 1 {
                    return Err(e.into());
                }
                failed.push(target.clone());
            }
        }
    }

    if !queued.is_empty() {
        if let Some(autorun) = &state.autorun {
            autorun.kick();
        }
    }

    if failed.is_empty() {
        return Ok((StatusCode::OK, Json(json!({ "result": "ok", "queued": queued }))));
    }
    let body = json!({
        "result": format!("Failed to queue {} of {} builds", failed.len(), targets.len()),
        "queued": queued,
        "failed": failed,
    });
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Read the body, refusing anything over `limit` bytes.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ApiError> {
    let declared = header(headers, CONTENT_LENGTH.as_str()).and_then(|v| v.parse::<u64>().ok());
    if let Some(length) = declared {
        if length > limit as u64 {
            warn!(length, limit, "Content too long");
            return Err(ApiError::BadRequest("Content too long".to_string()));
        }
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        warn!(limit, error = %e, "Content too long");
        ApiError::BadRequest("Content too long".to_string())
    })
}

/// Check the request signature against the configured secret.
fn verify_signature(
    server: &ServerConfig,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let hook = header(headers, HOOK_SIGNATURE_HEADER);
    let hub = header(headers, HUB_SIGNATURE_HEADER);

    if hook.is_none() && hub.is_none() {
        if server.require_signature {
            warn!("Rejecting unsigned webhook");
            return Err(ApiError::Unauthorized("Missing message signature".to_string()));
        }
        debug!("No message signature to check");
        return Ok(());
    }

    let valid = match server.secret.as_deref() {
        Some(secret) => match (hook, hub) {
            (Some(signature), _) => verify_sha512(secret, body, signature)?,
            (None, Some(signature)) => match signature.strip_prefix("sha256=") {
                Some(signature) => verify_sha256(secret, body, signature)?,
                None => false,
            },
            (None, None) => false,
        },
        None => {
            warn!("Signed webhook received but no secret is configured");
            false
        }
    };

    if !valid {
        warn!("Invalid message signature");
        return Err(ApiError::BadRequest("Invalid message signature".to_string()));
    }
    debug!("Message signature checked ok");
    Ok(())
}

fn verify_sha512(secret: &str, body: &[u8], signature: &str) -> Result<bool, ApiError> {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    mac.update(body);
    Ok(mac.verify_slice(&expected).is_ok())
}

fn verify_sha256(secret: &str, body: &[u8], signature: &str) -> Result<bool, ApiError> {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    mac.update(body);
    Ok(mac.verify_slice(&expected).is_ok())
}
