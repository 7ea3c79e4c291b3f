//! Notification ingest endpoint.
//!
//! `POST /apps/{app_id}/notifications`: verifies the body signature when a
//! secret is configured, parses the envelope and hands it to the engine.
//! Duplicates are a success to the caller; only malformed input and store
//! failures surface as errors.

use super::{ApiError, AppState, validate_app_id};
use crate::error::{IngestError, IngestOutcome};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use callscope_proto::Notification;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// Header carrying the hex HMAC-SHA256 of the raw body.
const SIGNATURE_HEADER: &str = "x-notification-signature";

pub(super) async fn receive_notification(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !validate_app_id(&app_id) {
        warn!(app_id = %app_id, "Rejected notification with invalid app id");
        return Err(IngestError::InvalidAppId(app_id).into());
    }

    if body.len() > state.config.http.max_body_bytes {
        warn!(app_id = %app_id, bytes = body.len(), "Rejected oversize notification");
        return Err(ApiError::PayloadTooLarge);
    }

    if let Some(secret) = &state.config.security.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(secret.as_bytes(), &body, signature) {
            warn!(app_id = %app_id, "Rejected notification with bad signature");
            return Err(ApiError::Unauthorized);
        }
    }

    let notification = Notification::parse(&body).map_err(|e| {
        warn!(app_id = %app_id, error = %e, "Failed to parse notification");
        ApiError::from(IngestError::Validation(e.to_string()))
    })?;

    let raw_payload = String::from_utf8_lossy(&body);
    debug!(
        app_id = %app_id,
        notice_id = %notification.notice_id,
        event_type = notification.event_type,
        "Received notification"
    );

    let outcome = state
        .engine
        .ingest(&app_id, &notification, &raw_payload)
        .await?;

    let status = match outcome {
        IngestOutcome::Accepted | IngestOutcome::AcceptedRawOnly => "accepted",
        IngestOutcome::Duplicate => "duplicate",
    };
    Ok(Json(json!({ "status": status })))
}

/// Constant-time check of the hex HMAC-SHA256 signature.
///
/// Returns false on any malformed input; absence of a configured secret is
/// handled by the caller (verification skipped entirely).
fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    if signature_hex.is_empty() {
        return false;
    }
    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let mut mac = match Hmac::<Sha256>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_accepted() {
        let secret = b"a-test-secret-of-decent-length";
        let body = br#"{"noticeId":"n-1"}"#;
        let sig = sign(secret, body);
        assert!(verify_signature(secret, body, &sig));
    }

    #[test]
    fn tampered_body_rejected() {
        let secret = b"a-test-secret-of-decent-length";
        let sig = sign(secret, b"original");
        assert!(!verify_signature(secret, b"tampered", &sig));
    }

    #[test]
    fn malformed_signature_rejected() {
        let secret = b"a-test-secret-of-decent-length";
        assert!(!verify_signature(secret, b"body", ""));
        assert!(!verify_signature(secret, b"body", "not-hex!"));
        assert!(!verify_signature(secret, b"body", "deadbeef"));
    }
}
