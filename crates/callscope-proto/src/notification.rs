//! JSON envelope for inbound notifications.
//!
//! The provider posts one notification per request. `payload.ts` (unix
//! seconds) is the authoritative event time; `notifyMs` is only the send
//! time and is kept for audit. Field presence varies by event type, so
//! everything beyond the envelope basics is optional here — required-field
//! policy is the daemon's concern.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Notification parse failures surfaced to the ingest API as 400s.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid notification json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("notification noticeId is empty")]
    EmptyNoticeId,
    #[error("payload channelName is empty")]
    EmptyChannelName,
}

/// Event-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub channel_name: String,
    /// Unix seconds; the authoritative event time.
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    /// Monotonic per-user counter used to order a user's own events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<i64>,
    /// Seconds; present on leave events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Top-level notification envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notice_id: String,
    pub product_id: i64,
    pub event_type: i64,
    /// Unix milliseconds; provider send time, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_ms: Option<i64>,
    /// Provider session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub payload: NotificationPayload,
}

impl Notification {
    /// Parse a raw request body, rejecting envelopes that are structurally
    /// valid JSON but unusable (empty identity fields).
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let notification: Notification = serde_json::from_slice(body)?;
        if notification.notice_id.is_empty() {
            return Err(ParseError::EmptyNoticeId);
        }
        if notification.payload.channel_name.is_empty() {
            return Err(ParseError::EmptyChannelName);
        }
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_join_notification() {
        let body = r#"{
            "noticeId": "n-1001",
            "productId": 1,
            "eventType": 103,
            "notifyMs": 1714000000123,
            "sid": "S-abc",
            "payload": {
                "channelName": "standup",
                "ts": 1714000000,
                "uid": 42,
                "clientSeq": 7,
                "platform": 7,
                "clientType": 3,
                "reason": 1,
                "account": "alice"
            }
        }"#;

        let n = Notification::parse(body.as_bytes()).unwrap();
        assert_eq!(n.notice_id, "n-1001");
        assert_eq!(n.event_type, 103);
        assert_eq!(n.payload.channel_name, "standup");
        assert_eq!(n.payload.uid, Some(42));
        assert_eq!(n.payload.client_seq, Some(7));
        assert_eq!(n.payload.duration, None);
        assert_eq!(n.payload.account.as_deref(), Some("alice"));
    }

    #[test]
    fn parses_minimal_lifecycle_notification() {
        let body = r#"{
            "noticeId": "n-1",
            "productId": 1,
            "eventType": 101,
            "payload": {"channelName": "room", "ts": 100}
        }"#;

        let n = Notification::parse(body.as_bytes()).unwrap();
        assert_eq!(n.event_type, 101);
        assert!(n.sid.is_none());
        assert!(n.payload.uid.is_none());
    }

    #[test]
    fn rejects_empty_notice_id() {
        let body = r#"{
            "noticeId": "",
            "productId": 1,
            "eventType": 101,
            "payload": {"channelName": "room", "ts": 100}
        }"#;
        assert!(matches!(
            Notification::parse(body.as_bytes()),
            Err(ParseError::EmptyNoticeId)
        ));
    }

    #[test]
    fn rejects_missing_ts() {
        let body = r#"{
            "noticeId": "n-2",
            "productId": 1,
            "eventType": 101,
            "payload": {"channelName": "room"}
        }"#;
        assert!(matches!(
            Notification::parse(body.as_bytes()),
            Err(ParseError::Json(_))
        ));
    }
}
