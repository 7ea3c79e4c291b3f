//! Raw notification log.
//!
//! One row per accepted notification, written inside the ingest transaction.
//! This table is the durability point for replay/debug: rows are never
//! mutated, and provisional epoch labels on raw rows survive merges (the
//! reconciled tables are relabelled instead).
//!
//! The epoch-resolution lookup ladder runs its timestamp probes against this
//! table, so those queries take the transaction connection; the repository
//! over the pool serves the read API.

use crate::db::DbError;
use sqlx::{SqliteConnection, SqlitePool};

/// Parameters for appending a raw notification row.
pub struct NewRawEvent<'a> {
    pub app_id: &'a str,
    pub notice_id: &'a str,
    pub product_id: i64,
    pub event_type: i64,
    pub channel_name: &'a str,
    pub uid: Option<i64>,
    pub client_seq: Option<i64>,
    pub platform: Option<i64>,
    pub reason: Option<i64>,
    pub client_type: Option<i64>,
    pub ts: i64,
    pub duration: Option<i64>,
    pub channel_session_id: Option<&'a str>,
    pub raw_payload: &'a str,
}

/// A join webhook row used for initial-role inference.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JoinEventRow {
    pub uid: i64,
    pub event_type: i64,
    pub ts: i64,
}

/// Append one raw notification row.
pub(crate) async fn insert_raw_event(
    conn: &mut SqliteConnection,
    row: &NewRawEvent<'_>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO raw_events
            (app_id, notice_id, product_id, event_type, channel_name, uid, client_seq,
             platform, reason, client_type, ts, duration, channel_session_id,
             received_at, raw_payload)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.app_id)
    .bind(row.notice_id)
    .bind(row.product_id)
    .bind(row.event_type)
    .bind(row.channel_name)
    .bind(row.uid)
    .bind(row.client_seq)
    .bind(row.platform)
    .bind(row.reason)
    .bind(row.client_type)
    .bind(row.ts)
    .bind(row.duration)
    .bind(row.channel_session_id)
    .bind(super::now_ts())
    .bind(row.raw_payload)
    .execute(conn)
    .await?;

    Ok(())
}

/// Newest channel-created event at or before `ts`.
pub(crate) async fn newest_create_at_or_before(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    ts: i64,
) -> Result<Option<i64>, DbError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT ts FROM raw_events
        WHERE app_id = ? AND channel_name = ? AND event_type = 101 AND ts <= ?
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(ts)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(ts,)| ts))
}

/// Newest channel-created event strictly before `ts`.
pub(crate) async fn newest_create_strictly_before(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    ts: i64,
) -> Result<Option<i64>, DbError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT ts FROM raw_events
        WHERE app_id = ? AND channel_name = ? AND event_type = 101 AND ts < ?
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(ts)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(ts,)| ts))
}

/// Whether a channel-destroyed event exists with `lo < ts <= hi`.
pub(crate) async fn destroy_between(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    lo: i64,
    hi: i64,
) -> Result<bool, DbError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM raw_events
            WHERE app_id = ? AND channel_name = ? AND event_type = 102
              AND ts > ? AND ts <= ?
        )
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(lo)
    .bind(hi)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

/// Whether a channel-destroyed event exists with `lo < ts < hi`.
pub(crate) async fn destroy_strictly_between(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    lo: i64,
    hi: i64,
) -> Result<bool, DbError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM raw_events
            WHERE app_id = ? AND channel_name = ? AND event_type = 102
              AND ts > ? AND ts < ?
        )
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(lo)
    .bind(hi)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

/// Whether a channel-destroyed event exists at exactly `ts`.
pub(crate) async fn destroy_at(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    ts: i64,
) -> Result<bool, DbError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM raw_events
            WHERE app_id = ? AND channel_name = ? AND event_type = 102 AND ts = ?
        )
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(ts)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

/// Earliest channel-created event strictly after `ts`.
pub(crate) async fn next_create_after(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    ts: i64,
) -> Result<Option<i64>, DbError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT ts FROM raw_events
        WHERE app_id = ? AND channel_name = ? AND event_type = 101 AND ts > ?
        ORDER BY ts ASC
        LIMIT 1
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(ts)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(ts,)| ts))
}

/// Newest channel-destroyed event strictly before `ts`.
pub(crate) async fn previous_destroy_before(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    ts: i64,
) -> Result<Option<i64>, DbError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT ts FROM raw_events
        WHERE app_id = ? AND channel_name = ? AND event_type = 102 AND ts < ?
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(ts)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(ts,)| ts))
}

/// Newest provisional epoch label observed at or before `ts` in the raw log.
pub(crate) async fn latest_provisional_event_at_or_before(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    ts: i64,
) -> Result<Option<String>, DbError> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT channel_session_id FROM raw_events
        WHERE app_id = ? AND channel_name = ?
          AND channel_session_id LIKE '%\_provisional' ESCAPE '\'
          AND ts <= ?
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(ts)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Raw-event repository for pool-based reads.
pub struct EventRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EventRepository<'a> {
    /// Create a new raw-event repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether a notification with this notice_id has already been stored.
    pub async fn notice_exists(&self, notice_id: &str) -> Result<bool, DbError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM raw_events WHERE notice_id = ?)")
                .bind(notice_id)
                .fetch_one(self.pool)
                .await?;
        Ok(exists)
    }

    /// Join webhook rows for one user near a timestamp, ascending by ts.
    ///
    /// Feeds initial-role inference: the join event closest to a session's
    /// recorded join time decides the role the user entered with. Matches on
    /// channel + uid rather than epoch label because raw rows keep their
    /// provisional labels after a merge.
    pub async fn join_events_near(
        &self,
        app_id: &str,
        channel_name: &str,
        uid: i64,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<JoinEventRow>, DbError> {
        let rows: Vec<JoinEventRow> = sqlx::query_as(
            r#"
            SELECT uid, event_type, ts FROM raw_events
            WHERE app_id = ? AND channel_name = ? AND uid = ?
              AND event_type IN (103, 105, 107)
              AND ts >= ? AND ts <= ?
            ORDER BY ts ASC
            "#,
        )
        .bind(app_id)
        .bind(channel_name)
        .bind(uid)
        .bind(lo)
        .bind(hi)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// All join webhook rows for a channel, ascending by ts.
    ///
    /// Bulk variant used when attributing a whole epoch at once.
    pub async fn join_events_for_channel(
        &self,
        app_id: &str,
        channel_name: &str,
    ) -> Result<Vec<JoinEventRow>, DbError> {
        let rows: Vec<JoinEventRow> = sqlx::query_as(
            r#"
            SELECT uid, event_type, ts FROM raw_events
            WHERE app_id = ? AND channel_name = ?
              AND event_type IN (103, 105, 107) AND uid IS NOT NULL
            ORDER BY ts ASC
            "#,
        )
        .bind(app_id)
        .bind(channel_name)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}
