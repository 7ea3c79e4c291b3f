//! Reconciliation engine.
//!
//! Consumes one notification at a time and repairs the stream into channel
//! epochs, presence sessions and role timelines. Correctness does not
//! depend on arrival order matching event time: it rests on atomic
//! per-notification transactions, the deterministic epoch lookup rules and
//! the client_seq watermark.
//!
//! Ingest is serialized per `(app_id, channel_name)` by a keyed mutex, so
//! the epoch state machine runs single-threaded per channel while distinct
//! channels proceed in parallel.

mod dedup;
mod epoch;
mod presence;

pub use epoch::{ActiveEpochs, EpochId};

use crate::config::IngestConfig;
use crate::db::{self, Database, DbError, NewRawEvent};
use crate::error::{IngestError, IngestOutcome};
use crate::metrics;
use callscope_proto::{EventKind, Notification, is_known_platform, is_known_product};
use chrono::DateTime;
use dashmap::DashMap;
use dedup::RecentNotices;
use epoch::ActiveUpdate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The reconciliation engine. Cheap to share behind an `Arc`.
pub struct Engine {
    db: Database,
    recent: RecentNotices,
    active: ActiveEpochs,
    channel_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    config: IngestConfig,
}

struct ProcessResult {
    outcome: IngestOutcome,
    update: ActiveUpdate,
}

impl Engine {
    pub fn new(db: Database, config: IngestConfig) -> Self {
        Self {
            db,
            recent: RecentNotices::new(config.dedup_cache_size),
            active: ActiveEpochs::new(),
            channel_locks: DashMap::new(),
            config,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Number of notice ids currently held in the dedup memo.
    pub fn dedup_memo_len(&self) -> usize {
        self.recent.len()
    }

    /// Currently active epoch for a channel, if the engine knows one.
    pub fn active_epoch(&self, app_id: &str, channel_name: &str) -> Option<EpochId> {
        self.active.get(app_id, channel_name)
    }

    /// Reconcile one notification.
    ///
    /// Called exactly once per received notification. Either every derived
    /// mutation commits, or none do; on failure the dedup memo entry is
    /// reverted so a retry with the same notice_id is not misread as a
    /// duplicate.
    pub async fn ingest(
        &self,
        app_id: &str,
        notification: &Notification,
        raw_payload: &str,
    ) -> Result<IngestOutcome, IngestError> {
        metrics::NOTICES_RECEIVED.inc();

        let channel_name = notification.payload.channel_name.as_str();
        let lock = self
            .channel_locks
            .entry(format!("{app_id}:{channel_name}"))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Dedup: memo first, store authoritative on a miss.
        let notice_id = notification.notice_id.as_str();
        if self.recent.contains(notice_id) {
            metrics::NOTICES_DUPLICATE.inc();
            info!(notice_id = %notice_id, "Duplicate notification (memo hit)");
            return Ok(IngestOutcome::Duplicate);
        }
        if self.db.events().notice_exists(notice_id).await.map_err(IngestError::Store)? {
            metrics::NOTICES_DUPLICATE.inc();
            info!(notice_id = %notice_id, "Duplicate notification (store hit)");
            return Ok(IngestOutcome::Duplicate);
        }
        self.recent.insert(notice_id);

        let deadline = Duration::from_millis(self.config.deadline_ms);
        let result = tokio::time::timeout(
            deadline,
            self.process(app_id, notification, raw_payload),
        )
        .await;

        match result {
            Ok(Ok(processed)) => {
                match processed.update {
                    ActiveUpdate::Set(epoch) => self.active.set(app_id, channel_name, epoch),
                    ActiveUpdate::Clear => self.active.clear(app_id, channel_name),
                    ActiveUpdate::Keep => {}
                }
                metrics::NOTICES_ACCEPTED.inc();
                Ok(processed.outcome)
            }
            Ok(Err(e)) => {
                self.recent.remove(notice_id);
                let err = IngestError::Store(e);
                metrics::record_ingest_error(err.error_code());
                Err(err)
            }
            Err(_) => {
                // Dropping the in-flight transaction rolls it back.
                self.recent.remove(notice_id);
                let err = IngestError::DeadlineExceeded(self.config.deadline_ms);
                metrics::record_ingest_error(err.error_code());
                Err(err)
            }
        }
    }

    /// All store work for one notification, inside one transaction.
    async fn process(
        &self,
        app_id: &str,
        notification: &Notification,
        raw_payload: &str,
    ) -> Result<ProcessResult, DbError> {
        let payload = &notification.payload;
        let channel_name = payload.channel_name.as_str();
        let kind = EventKind::from_code(notification.event_type);
        let ts = payload.ts;

        log_unknown_values(notification);

        let mut tx = self.db.pool().begin().await?;

        let active = self.active.get(app_id, channel_name);
        let resolved = epoch::resolve(&mut tx, app_id, channel_name, kind, ts, active).await?;
        let epoch_label = resolved
            .epoch
            .map(|e| e.render(app_id, channel_name));

        db::insert_raw_event(
            &mut tx,
            &NewRawEvent {
                app_id,
                notice_id: &notification.notice_id,
                product_id: notification.product_id,
                event_type: notification.event_type,
                channel_name,
                uid: payload.uid,
                client_seq: payload.client_seq,
                platform: payload.platform,
                reason: payload.reason,
                client_type: payload.client_type,
                ts,
                duration: payload.duration,
                channel_session_id: epoch_label.as_deref(),
                raw_payload,
            },
        )
        .await?;

        let mut outcome = IngestOutcome::Accepted;

        match (kind, &epoch_label) {
            (Some(kind), Some(label)) if kind.is_user_event() => {
                match (payload.uid, payload.client_seq) {
                    (Some(uid), Some(client_seq)) => {
                        let ev = presence::UserEvent {
                            app_id,
                            kind,
                            epoch_label: label,
                            uid,
                            client_seq,
                            notification,
                        };
                        if kind.is_join() {
                            presence::handle_join(&mut tx, &ev).await?;
                        } else if kind.is_leave() {
                            presence::handle_leave(&mut tx, &ev).await?;
                        } else {
                            presence::handle_role_change(&mut tx, &ev).await?;
                        }
                    }
                    (uid, client_seq) => {
                        // Persist-raw-only path: cannot order the user's
                        // events without both identifiers.
                        info!(
                            event = kind.name(),
                            uid = ?uid,
                            client_seq = ?client_seq,
                            "User event missing uid/clientSeq, raw row only"
                        );
                        outcome = IngestOutcome::AcceptedRawOnly;
                    }
                }
            }
            (Some(_), _) => {}
            (None, _) => {
                warn!(
                    event_type = notification.event_type,
                    "Unknown event type, raw row only"
                );
                outcome = IngestOutcome::AcceptedRawOnly;
            }
        }

        // Idempotent rollup refresh for the day this event touches.
        if let Some(label) = &epoch_label {
            let (day, day_start, day_end) = day_bounds(ts);
            db::recompute_channel_day(
                &mut tx,
                app_id,
                channel_name,
                label,
                &day,
                day_start,
                day_end,
            )
            .await?;
            if let Some(uid) = payload.uid {
                db::recompute_user_day(
                    &mut tx,
                    app_id,
                    uid,
                    channel_name,
                    label,
                    &day,
                    day_start,
                    day_end,
                )
                .await?;
            }
        }

        tx.commit().await?;

        Ok(ProcessResult {
            outcome,
            update: resolved.update,
        })
    }
}

/// UTC day key and bounds (half-open, unix seconds) for a timestamp.
pub(crate) fn day_bounds(ts: i64) -> (String, i64, i64) {
    let day_start = ts.div_euclid(86_400) * 86_400;
    let day = DateTime::from_timestamp(day_start, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string());
    (day, day_start, day_start + 86_400)
}

/// Log platform/product ids outside the known mapping tables so they can be
/// added later.
fn log_unknown_values(notification: &Notification) {
    if let Some(platform) = notification.payload.platform
        && !is_known_platform(platform)
    {
        warn!(
            platform,
            event_type = notification.event_type,
            channel = %notification.payload.channel_name,
            "Unknown platform id"
        );
    }
    if !is_known_product(notification.product_id) {
        warn!(
            product_id = notification.product_id,
            event_type = notification.event_type,
            channel = %notification.payload.channel_name,
            "Unknown product id"
        );
    }
}
