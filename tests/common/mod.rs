//! Integration test common infrastructure.
//!
//! Builds an engine over a temp-file SQLite store and provides notification
//! builders for driving the reconciliation pipeline.

#![allow(dead_code)]

use callscope::config::IngestConfig;
use callscope::db::Database;
use callscope::engine::Engine;
use callscope::error::IngestOutcome;
use callscope_proto::{Notification, NotificationPayload};
use tempfile::TempDir;

/// An engine bound to a throwaway database.
pub struct TestEngine {
    pub engine: Engine,
    _dir: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(IngestConfig::default()).await
    }

    pub async fn with_config(config: IngestConfig) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().expect("utf8 temp path"))
            .await
            .expect("open test database");
        Self {
            engine: Engine::new(db, config),
            _dir: dir,
        }
    }

    /// Ingest a notification, serializing it as the raw payload.
    pub async fn ingest(&self, app_id: &str, notification: &Notification) -> IngestOutcome {
        let raw = serde_json::to_string(notification).expect("serialize notification");
        self.engine
            .ingest(app_id, notification, &raw)
            .await
            .expect("ingest")
    }
}

/// Fluent builder for test notifications.
pub struct Notify {
    notification: Notification,
}

impl Notify {
    pub fn new(notice_id: &str, event_type: i64, channel: &str, ts: i64) -> Self {
        Self {
            notification: Notification {
                notice_id: notice_id.to_string(),
                product_id: 1,
                event_type,
                notify_ms: Some(ts * 1000),
                sid: None,
                payload: NotificationPayload {
                    channel_name: channel.to_string(),
                    ts,
                    uid: None,
                    client_seq: None,
                    platform: Some(7),
                    client_type: None,
                    reason: None,
                    duration: None,
                    account: None,
                },
            },
        }
    }

    pub fn user(mut self, uid: i64, client_seq: i64) -> Self {
        self.notification.payload.uid = Some(uid);
        self.notification.payload.client_seq = Some(client_seq);
        self
    }

    pub fn duration(mut self, secs: i64) -> Self {
        self.notification.payload.duration = Some(secs);
        self
    }

    pub fn reason(mut self, reason: i64) -> Self {
        self.notification.payload.reason = Some(reason);
        self
    }

    pub fn platform(mut self, platform: i64) -> Self {
        self.notification.payload.platform = Some(platform);
        self
    }

    pub fn client_type(mut self, client_type: i64) -> Self {
        self.notification.payload.client_type = Some(client_type);
        self
    }

    pub fn no_platform(mut self) -> Self {
        self.notification.payload.platform = None;
        self
    }

    pub fn sid(mut self, sid: &str) -> Self {
        self.notification.sid = Some(sid.to_string());
        self
    }

    pub fn account(mut self, account: &str) -> Self {
        self.notification.payload.account = Some(account.to_string());
        self
    }

    pub fn build(self) -> Notification {
        self.notification
    }
}
