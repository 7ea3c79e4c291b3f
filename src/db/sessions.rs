//! Presence sessions and role events.
//!
//! A presence session is one join–leave interval for a user within a channel
//! epoch; at most one open session exists per (epoch, uid). Role events are
//! append-only. The ingest transaction mutates these tables through the
//! connection-taking functions; the repository serves the read API.

use crate::db::DbError;
use sqlx::{SqliteConnection, SqlitePool};

/// A presence session row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: i64,
    pub app_id: String,
    pub channel_name: String,
    pub channel_session_id: String,
    pub sid: Option<String>,
    pub uid: i64,
    pub join_ts: i64,
    pub leave_ts: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub last_client_seq: Option<i64>,
    pub product_id: Option<i64>,
    pub platform: Option<i64>,
    pub reason: Option<i64>,
    pub client_type: Option<i64>,
    pub account: Option<String>,
    pub is_host: bool,
    pub communication_mode: i64,
    pub role_switches: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A role-change row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleEventRow {
    pub id: i64,
    pub app_id: String,
    pub channel_name: String,
    pub channel_session_id: String,
    pub uid: i64,
    pub ts: i64,
    pub new_role: String,
}

/// Parameters for opening or synthesizing a session.
pub struct NewSession<'a> {
    pub app_id: &'a str,
    pub channel_name: &'a str,
    pub channel_session_id: &'a str,
    pub sid: Option<&'a str>,
    pub uid: i64,
    pub join_ts: i64,
    pub leave_ts: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub last_client_seq: Option<i64>,
    pub product_id: Option<i64>,
    pub platform: Option<i64>,
    pub reason: Option<i64>,
    pub client_type: Option<i64>,
    pub account: Option<&'a str>,
    pub is_host: bool,
    pub communication_mode: i64,
}

const SESSION_COLUMNS: &str = r#"id, app_id, channel_name, channel_session_id, sid, uid,
    join_ts, leave_ts, duration_seconds, last_client_seq, product_id, platform,
    reason, client_type, account, is_host, communication_mode, role_switches,
    created_at, updated_at"#;

/// Open session for one (epoch, uid), if any.
pub(crate) async fn find_open_session(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    channel_session_id: &str,
    uid: i64,
) -> Result<Option<SessionRow>, DbError> {
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {SESSION_COLUMNS} FROM presence_sessions
        WHERE app_id = ? AND channel_name = ? AND channel_session_id = ?
          AND uid = ? AND leave_ts IS NULL
        LIMIT 1
        "#
    ))
    .bind(app_id)
    .bind(channel_name)
    .bind(channel_session_id)
    .bind(uid)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

/// Newest open session for a user in a channel, regardless of epoch.
pub(crate) async fn find_open_session_any_epoch(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    uid: i64,
) -> Result<Option<SessionRow>, DbError> {
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {SESSION_COLUMNS} FROM presence_sessions
        WHERE app_id = ? AND channel_name = ? AND uid = ? AND leave_ts IS NULL
        ORDER BY join_ts DESC
        LIMIT 1
        "#
    ))
    .bind(app_id)
    .bind(channel_name)
    .bind(uid)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

/// Insert a session row and return its id.
pub(crate) async fn insert_session(
    conn: &mut SqliteConnection,
    session: &NewSession<'_>,
) -> Result<i64, DbError> {
    let now = super::now_ts();
    let result = sqlx::query(
        r#"
        INSERT INTO presence_sessions
            (app_id, channel_name, channel_session_id, sid, uid, join_ts, leave_ts,
             duration_seconds, last_client_seq, product_id, platform, reason,
             client_type, account, is_host, communication_mode, role_switches,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(session.app_id)
    .bind(session.channel_name)
    .bind(session.channel_session_id)
    .bind(session.sid)
    .bind(session.uid)
    .bind(session.join_ts)
    .bind(session.leave_ts)
    .bind(session.duration_seconds)
    .bind(session.last_client_seq)
    .bind(session.product_id)
    .bind(session.platform)
    .bind(session.reason)
    .bind(session.client_type)
    .bind(session.account)
    .bind(session.is_host)
    .bind(session.communication_mode)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Refresh an open session's join time (rewind or reconnection heartbeat)
/// and advance its client_seq watermark.
pub(crate) async fn refresh_session_join(
    conn: &mut SqliteConnection,
    session_id: i64,
    join_ts: i64,
    last_client_seq: i64,
    account: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE presence_sessions
        SET join_ts = ?, last_client_seq = ?,
            account = COALESCE(?, account),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(join_ts)
    .bind(last_client_seq)
    .bind(account)
    .bind(super::now_ts())
    .bind(session_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Apply a role switch to an open session. Communication mode is fixed at
/// session creation and deliberately not touched here.
pub(crate) async fn update_session_role(
    conn: &mut SqliteConnection,
    session_id: i64,
    is_host: bool,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE presence_sessions
        SET is_host = ?, role_switches = role_switches + 1, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(is_host)
    .bind(super::now_ts())
    .bind(session_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Close a session, overwriting its timing with the reconciled values.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn close_session(
    conn: &mut SqliteConnection,
    session_id: i64,
    join_ts: i64,
    leave_ts: i64,
    reason: Option<i64>,
    account: Option<&str>,
    sid: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE presence_sessions
        SET join_ts = ?, leave_ts = ?, duration_seconds = ?,
            reason = ?, account = COALESCE(?, account), sid = COALESCE(sid, ?),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(join_ts)
    .bind(leave_ts)
    .bind(leave_ts - join_ts)
    .bind(reason)
    .bind(account)
    .bind(sid)
    .bind(super::now_ts())
    .bind(session_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Append a role-change row.
pub(crate) async fn insert_role_event(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    channel_session_id: &str,
    uid: i64,
    ts: i64,
    new_role: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO role_events (app_id, channel_name, channel_session_id, uid, ts, new_role)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(channel_session_id)
    .bind(uid)
    .bind(ts)
    .bind(new_role)
    .execute(conn)
    .await?;

    Ok(())
}

/// Role events for one user at or after a timestamp, under the epoch or its
/// provisional sibling label, ascending by ts. A fresh join replays these to
/// recover switches that arrived before the join did.
pub(crate) async fn pending_role_events(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    channel_session_id: &str,
    uid: i64,
    from_ts: i64,
) -> Result<Vec<RoleEventRow>, DbError> {
    let sibling = format!("{channel_session_id}_provisional");
    let rows: Vec<RoleEventRow> = sqlx::query_as(
        r#"
        SELECT id, app_id, channel_name, channel_session_id, uid, ts, new_role
        FROM role_events
        WHERE app_id = ? AND channel_name = ? AND uid = ? AND ts >= ?
          AND channel_session_id IN (?, ?)
        ORDER BY ts ASC
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(uid)
    .bind(from_ts)
    .bind(channel_session_id)
    .bind(&sibling)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

/// Earliest provisional session label for a channel, if any.
pub(crate) async fn earliest_provisional_session(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
) -> Result<Option<String>, DbError> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT channel_session_id FROM presence_sessions
        WHERE app_id = ? AND channel_name = ?
          AND channel_session_id LIKE '%\_provisional' ESCAPE '\'
        ORDER BY join_ts ASC
        LIMIT 1
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Relabel provisional sessions whose join falls in `[lo, hi)`.
pub(crate) async fn relabel_provisional_sessions(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    lo: i64,
    hi: i64,
    new_id: &str,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE presence_sessions
        SET channel_session_id = ?, updated_at = ?
        WHERE app_id = ? AND channel_name = ?
          AND channel_session_id LIKE '%\_provisional' ESCAPE '\'
          AND join_ts >= ? AND join_ts < ?
        "#,
    )
    .bind(new_id)
    .bind(super::now_ts())
    .bind(app_id)
    .bind(channel_name)
    .bind(lo)
    .bind(hi)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Relabel provisional role events whose ts falls in `[lo, hi)`.
pub(crate) async fn relabel_provisional_role_events(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    lo: i64,
    hi: i64,
    new_id: &str,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE role_events
        SET channel_session_id = ?
        WHERE app_id = ? AND channel_name = ?
          AND channel_session_id LIKE '%\_provisional' ESCAPE '\'
          AND ts >= ? AND ts < ?
        "#,
    )
    .bind(new_id)
    .bind(app_id)
    .bind(channel_name)
    .bind(lo)
    .bind(hi)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// One channel epoch as listed by the read API.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EpochSummary {
    pub channel_name: String,
    pub channel_session_id: String,
    pub total_seconds: Option<i64>,
    pub unique_users: i64,
    pub first_join_ts: Option<i64>,
    pub last_leave_ts: Option<i64>,
}

/// Session repository for pool-based reads.
pub struct SessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepository<'a> {
    /// Create a new session repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Count distinct (channel, epoch) pairs with completed sessions.
    pub async fn count_epochs(&self, app_id: &str) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT channel_name, channel_session_id FROM presence_sessions
                WHERE app_id = ? AND duration_seconds IS NOT NULL
                GROUP BY channel_name, channel_session_id
            )
            "#,
        )
        .bind(app_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Page of channel epochs, ordered by last activity descending.
    pub async fn list_epochs(
        &self,
        app_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EpochSummary>, DbError> {
        let rows: Vec<EpochSummary> = sqlx::query_as(
            r#"
            SELECT channel_name, channel_session_id,
                   SUM(duration_seconds) AS total_seconds,
                   COUNT(DISTINCT uid) AS unique_users,
                   MIN(join_ts) AS first_join_ts,
                   MAX(leave_ts) AS last_leave_ts
            FROM presence_sessions
            WHERE app_id = ? AND duration_seconds IS NOT NULL
            GROUP BY channel_name, channel_session_id
            ORDER BY last_leave_ts DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(app_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Distinct non-null client types observed within one epoch.
    pub async fn epoch_client_types(
        &self,
        app_id: &str,
        channel_name: &str,
        channel_session_id: &str,
    ) -> Result<Vec<i64>, DbError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT client_type FROM presence_sessions
            WHERE app_id = ? AND channel_name = ? AND channel_session_id = ?
              AND client_type IS NOT NULL
            "#,
        )
        .bind(app_id)
        .bind(channel_name)
        .bind(channel_session_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(ct,)| ct).collect())
    }

    /// Most recent epoch label for a channel, by join time.
    pub async fn latest_epoch(
        &self,
        app_id: &str,
        channel_name: &str,
    ) -> Result<Option<String>, DbError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT channel_session_id FROM presence_sessions
            WHERE app_id = ? AND channel_name = ?
            ORDER BY join_ts DESC
            LIMIT 1
            "#,
        )
        .bind(app_id)
        .bind(channel_name)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Sessions within one epoch, newest join first, capped.
    pub async fn list_for_epoch(
        &self,
        app_id: &str,
        channel_name: &str,
        channel_session_id: &str,
        limit: i64,
    ) -> Result<Vec<SessionRow>, DbError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM presence_sessions
            WHERE app_id = ? AND channel_name = ? AND channel_session_id = ?
            ORDER BY join_ts DESC
            LIMIT ?
            "#
        ))
        .bind(app_id)
        .bind(channel_name)
        .bind(channel_session_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// All sessions for one user across channels, newest join first.
    pub async fn list_for_user(&self, app_id: &str, uid: i64) -> Result<Vec<SessionRow>, DbError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM presence_sessions
            WHERE app_id = ? AND uid = ?
            ORDER BY join_ts DESC
            "#
        ))
        .bind(app_id)
        .bind(uid)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Sessions overlapping a time window: completed sessions intersecting
    /// it, plus still-open sessions that started before it ended.
    pub async fn list_overlapping(
        &self,
        app_id: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<SessionRow>, DbError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM presence_sessions
            WHERE app_id = ? AND join_ts < ?
              AND (leave_ts IS NULL OR leave_ts >= ?)
            ORDER BY join_ts ASC
            "#
        ))
        .bind(app_id)
        .bind(end_ts)
        .bind(start_ts)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Role events under one epoch label, ascending by ts.
    pub async fn role_events_for_epoch(
        &self,
        channel_session_id: &str,
    ) -> Result<Vec<RoleEventRow>, DbError> {
        let rows: Vec<RoleEventRow> = sqlx::query_as(
            r#"
            SELECT id, app_id, channel_name, channel_session_id, uid, ts, new_role
            FROM role_events
            WHERE channel_session_id = ?
            ORDER BY ts ASC
            "#,
        )
        .bind(channel_session_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Distinct platforms observed for an app, ascending.
    pub async fn distinct_platforms(&self, app_id: &str) -> Result<Vec<i64>, DbError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT platform FROM presence_sessions
            WHERE app_id = ? AND platform IS NOT NULL
            ORDER BY platform ASC
            "#,
        )
        .bind(app_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    /// Distinct client types observed for an app, optionally filtered by
    /// platform. NULL client types are reported as `None` entries.
    pub async fn distinct_client_types(
        &self,
        app_id: &str,
        platform: Option<i64>,
    ) -> Result<Vec<Option<i64>>, DbError> {
        let rows: Vec<(Option<i64>,)> = match platform {
            Some(platform) => {
                sqlx::query_as(
                    r#"
                    SELECT DISTINCT client_type FROM presence_sessions
                    WHERE app_id = ? AND platform = ?
                    ORDER BY client_type ASC
                    "#,
                )
                .bind(app_id)
                .bind(platform)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT DISTINCT client_type FROM presence_sessions
                    WHERE app_id = ?
                    ORDER BY client_type ASC
                    "#,
                )
                .bind(app_id)
                .fetch_all(self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(|(ct,)| ct).collect())
    }

    /// Count sessions still carrying a provisional label in a channel.
    pub async fn count_provisional(
        &self,
        app_id: &str,
        channel_name: &str,
    ) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM presence_sessions
            WHERE app_id = ? AND channel_name = ?
              AND channel_session_id LIKE '%\_provisional' ESCAPE '\'
            "#,
        )
        .bind(app_id)
        .bind(channel_name)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }
}
