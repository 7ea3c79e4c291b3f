//! Channel epochs: identity, the active-epoch map, the resolution ladder
//! and the provisional merge.
//!
//! An epoch is a half-open `[create_ts, destroy_ts)` interval for one
//! `(app_id, channel_name)`. At most one epoch is active per channel at any
//! instant. User events arriving without a known active epoch are attached
//! by the lookup ladder; events that predate their channel-created
//! notification get a provisional epoch that a later create merges away.

use crate::db::{self, DbError};
use crate::metrics;
use callscope_proto::EventKind;
use dashmap::DashMap;
use sqlx::SqliteConnection;
use std::fmt;

/// Epoch identity.
///
/// Rendered as `<app>_<channel>_<ts>` for confirmed epochs and
/// `<app>_<channel>_<ts>_provisional` for synthesized ones; the store and
/// the read API carry the rendered form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochId {
    /// Opened by a channel-created event at this timestamp.
    Confirmed { ts: i64 },
    /// Synthesized for an orphan user event at this timestamp.
    Provisional { ts: i64 },
}

impl EpochId {
    pub fn ts(&self) -> i64 {
        match self {
            Self::Confirmed { ts } | Self::Provisional { ts } => *ts,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional { .. })
    }

    /// Render the persisted string form.
    pub fn render(&self, app_id: &str, channel_name: &str) -> String {
        match self {
            Self::Confirmed { ts } => format!("{app_id}_{channel_name}_{ts}"),
            Self::Provisional { ts } => format!("{app_id}_{channel_name}_{ts}_provisional"),
        }
    }

    /// Parse a persisted epoch label back into its tagged form.
    ///
    /// Labels are split from the right because channel names may contain
    /// underscores themselves.
    pub fn parse(label: &str) -> Option<Self> {
        let (body, provisional) = match label.strip_suffix("_provisional") {
            Some(body) => (body, true),
            None => (label, false),
        };
        let (_, ts) = body.rsplit_once('_')?;
        let ts: i64 = ts.parse().ok()?;
        Some(if provisional {
            Self::Provisional { ts }
        } else {
            Self::Confirmed { ts }
        })
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed { ts } => write!(f, "confirmed@{ts}"),
            Self::Provisional { ts } => write!(f, "provisional@{ts}"),
        }
    }
}

/// Map of currently active epochs, keyed by `app_id:channel_name`.
#[derive(Default)]
pub struct ActiveEpochs {
    map: DashMap<String, EpochId>,
}

impl ActiveEpochs {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(app_id: &str, channel_name: &str) -> String {
        format!("{app_id}:{channel_name}")
    }

    pub fn get(&self, app_id: &str, channel_name: &str) -> Option<EpochId> {
        self.map.get(&Self::key(app_id, channel_name)).map(|e| *e)
    }

    pub fn set(&self, app_id: &str, channel_name: &str, epoch: EpochId) {
        if self.map.insert(Self::key(app_id, channel_name), epoch).is_none() {
            metrics::ACTIVE_EPOCHS.inc();
        }
    }

    pub fn clear(&self, app_id: &str, channel_name: &str) {
        if self.map.remove(&Self::key(app_id, channel_name)).is_some() {
            metrics::ACTIVE_EPOCHS.dec();
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// How the active-epoch map should change once the transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActiveUpdate {
    Set(EpochId),
    Clear,
    Keep,
}

/// Outcome of epoch resolution for one notification.
pub(crate) struct Resolved {
    pub epoch: Option<EpochId>,
    pub update: ActiveUpdate,
}

/// Resolve the epoch a notification belongs to.
///
/// `active` is the current map entry for the channel; map mutations are
/// deferred to the caller via `Resolved::update` so a rolled-back
/// transaction leaves the in-memory state untouched.
pub(crate) async fn resolve(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    kind: Option<EventKind>,
    ts: i64,
    active: Option<EpochId>,
) -> Result<Resolved, DbError> {
    match kind {
        Some(EventKind::ChannelCreated) => {
            let epoch = EpochId::Confirmed { ts };
            merge_provisional(conn, app_id, channel_name, ts).await?;
            tracing::info!(app = %app_id, channel = %channel_name, epoch = %epoch, "Opened channel epoch");
            Ok(Resolved {
                epoch: Some(epoch),
                update: ActiveUpdate::Set(epoch),
            })
        }
        Some(EventKind::ChannelDestroyed) => {
            // The destroy row is labelled with whatever epoch was active;
            // a destroy with no known epoch is persisted unlabelled.
            if active.is_none() {
                tracing::warn!(app = %app_id, channel = %channel_name, ts, "Destroy event for channel with no active epoch");
            }
            Ok(Resolved {
                epoch: active,
                update: ActiveUpdate::Clear,
            })
        }
        Some(kind) if kind.is_user_event() => {
            if let Some(epoch) = active {
                return Ok(Resolved {
                    epoch: Some(epoch),
                    update: ActiveUpdate::Keep,
                });
            }
            resolve_user_event(conn, app_id, channel_name, kind, ts).await
        }
        // Unknown or non-user codes outside an active epoch: label only.
        _ => Ok(Resolved {
            epoch: active,
            update: ActiveUpdate::Keep,
        }),
    }
}

/// The lookup ladder for user events with no active epoch entry.
async fn resolve_user_event(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    kind: EventKind,
    ts: i64,
) -> Result<Resolved, DbError> {
    // (a) Newest confirmed create at or before ts with no destroy since.
    if let Some(create_ts) = db::newest_create_at_or_before(conn, app_id, channel_name, ts).await?
        && !db::destroy_between(conn, app_id, channel_name, create_ts, ts).await?
    {
        let epoch = EpochId::Confirmed { ts: create_ts };
        tracing::info!(app = %app_id, channel = %channel_name, epoch = %epoch, "Reinstated active epoch for out-of-order event");
        return Ok(Resolved {
            epoch: Some(epoch),
            update: ActiveUpdate::Set(epoch),
        });
    }

    // (b) Leave events only: a closed epoch enclosing the user's presence.
    // Labels the leave but does not resurrect the epoch.
    if kind.is_leave()
        && let Some(create_ts) =
            db::newest_create_at_or_before(conn, app_id, channel_name, ts).await?
        && db::destroy_between(conn, app_id, channel_name, create_ts, ts).await?
    {
        let epoch = EpochId::Confirmed { ts: create_ts };
        tracing::info!(app = %app_id, channel = %channel_name, epoch = %epoch, "Labelled late leave with closed epoch");
        return Ok(Resolved {
            epoch: Some(epoch),
            update: ActiveUpdate::Keep,
        });
    }

    // (c) A destroy at exactly ts: the event rode out the epoch that just
    // closed, so label it with the create preceding the destroy.
    if db::destroy_at(conn, app_id, channel_name, ts).await?
        && let Some(create_ts) =
            db::newest_create_strictly_before(conn, app_id, channel_name, ts).await?
    {
        let epoch = EpochId::Confirmed { ts: create_ts };
        return Ok(Resolved {
            epoch: Some(epoch),
            update: ActiveUpdate::Set(epoch),
        });
    }

    // (d) Reuse the most recent provisional epoch, unless a destroy cut it
    // off. The raw log is checked first, then sessions that may have been
    // written before any raw provisional row survived.
    if let Some(label) =
        db::latest_provisional_event_at_or_before(conn, app_id, channel_name, ts).await?
        && let Some(epoch) = reusable_provisional(conn, app_id, channel_name, &label, ts).await?
    {
        return Ok(Resolved {
            epoch: Some(epoch),
            update: ActiveUpdate::Set(epoch),
        });
    }
    if let Some(label) = db::earliest_provisional_session(conn, app_id, channel_name).await?
        && let Some(epoch) = reusable_provisional(conn, app_id, channel_name, &label, ts).await?
    {
        return Ok(Resolved {
            epoch: Some(epoch),
            update: ActiveUpdate::Set(epoch),
        });
    }

    // (e) No epoch to attach to: synthesize a provisional one.
    let epoch = EpochId::Provisional { ts };
    metrics::PROVISIONAL_EPOCHS.inc();
    tracing::info!(app = %app_id, channel = %channel_name, epoch = %epoch, "Created provisional epoch for orphan event");
    Ok(Resolved {
        epoch: Some(epoch),
        update: ActiveUpdate::Set(epoch),
    })
}

/// A provisional label is reusable when it predates the event and no
/// destroy fell strictly between the two.
async fn reusable_provisional(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    label: &str,
    ts: i64,
) -> Result<Option<EpochId>, DbError> {
    let Some(epoch) = EpochId::parse(label) else {
        tracing::warn!(label = %label, "Unparseable provisional epoch label");
        return Ok(None);
    };
    if !epoch.is_provisional() || epoch.ts() > ts {
        return Ok(None);
    }
    if db::destroy_strictly_between(conn, app_id, channel_name, epoch.ts(), ts).await? {
        return Ok(None);
    }
    Ok(Some(epoch))
}

/// Merge provisional rows into confirmed epochs after a create at `ts_c`.
///
/// Rows in `[ts_c, next_create)` belong to the new epoch. Rows stranded in
/// `[previous_destroy, ts_c)` belong to the epoch that destroy closed and
/// are relabelled to it instead.
async fn merge_provisional(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    ts_c: i64,
) -> Result<(), DbError> {
    let confirmed = EpochId::Confirmed { ts: ts_c }.render(app_id, channel_name);
    let end_ts = db::next_create_after(conn, app_id, channel_name, ts_c)
        .await?
        .unwrap_or(i64::MAX);

    let mut merged = 0;
    merged +=
        db::relabel_provisional_sessions(conn, app_id, channel_name, ts_c, end_ts, &confirmed)
            .await?;
    merged +=
        db::relabel_provisional_role_events(conn, app_id, channel_name, ts_c, end_ts, &confirmed)
            .await?;

    if let Some(destroy_ts) = db::previous_destroy_before(conn, app_id, channel_name, ts_c).await?
        && let Some(prev_create_ts) =
            db::newest_create_strictly_before(conn, app_id, channel_name, destroy_ts).await?
    {
        let previous = EpochId::Confirmed { ts: prev_create_ts }.render(app_id, channel_name);
        merged += db::relabel_provisional_sessions(
            conn,
            app_id,
            channel_name,
            destroy_ts,
            ts_c,
            &previous,
        )
        .await?;
        merged += db::relabel_provisional_role_events(
            conn,
            app_id,
            channel_name,
            destroy_ts,
            ts_c,
            &previous,
        )
        .await?;
    }

    if merged > 0 {
        metrics::PROVISIONAL_ROWS_MERGED.inc_by(merged);
        tracing::info!(
            app = %app_id,
            channel = %channel_name,
            create_ts = ts_c,
            rows = merged,
            "Merged provisional rows into confirmed epoch"
        );
    }

    Ok(())
}
