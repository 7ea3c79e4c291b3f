//! Per-day channel and user aggregates.
//!
//! Rollups are recomputed from the session table and overwritten in place;
//! nothing here increments. Running the recompute twice for the same key is
//! a no-op, which is what lets out-of-order and duplicate notifications
//! converge on the same totals.

use crate::db::DbError;
use sqlx::{SqliteConnection, SqlitePool};

/// A per-day channel rollup row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelDailyRow {
    pub app_id: String,
    pub channel_name: String,
    pub channel_session_id: String,
    pub day: String,
    pub total_users: i64,
    pub unique_users: i64,
    pub total_minutes: f64,
    pub first_activity_ts: Option<i64>,
    pub last_activity_ts: Option<i64>,
}

/// A per-day user rollup row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserDailyRow {
    pub app_id: String,
    pub uid: i64,
    pub channel_name: String,
    pub channel_session_id: String,
    pub day: String,
    pub total_minutes: f64,
    pub session_count: i64,
}

/// Recompute the channel rollup for one (epoch, day) from scratch.
///
/// `day_start`/`day_end` bound the UTC day as unix seconds, half-open.
pub(crate) async fn recompute_channel_day(
    conn: &mut SqliteConnection,
    app_id: &str,
    channel_name: &str,
    channel_session_id: &str,
    day: &str,
    day_start: i64,
    day_end: i64,
) -> Result<(), DbError> {
    let (total_seconds, unique_users, total_users): (Option<i64>, i64, i64) = sqlx::query_as(
        r#"
        SELECT SUM(duration_seconds),
               COUNT(DISTINCT CASE WHEN uid > 0 THEN uid END),
               COUNT(CASE WHEN uid > 0 THEN 1 END)
        FROM presence_sessions
        WHERE app_id = ? AND channel_name = ? AND channel_session_id = ?
          AND join_ts >= ? AND join_ts < ?
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(channel_session_id)
    .bind(day_start)
    .bind(day_end)
    .fetch_one(&mut *conn)
    .await?;

    // First activity is the channel-created event, last is the latest
    // terminating event (destroy or any leave) seen that day.
    let first_activity: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT MIN(ts) FROM raw_events
        WHERE app_id = ? AND channel_name = ? AND channel_session_id = ?
          AND event_type = 101 AND ts >= ? AND ts < ?
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(channel_session_id)
    .bind(day_start)
    .bind(day_end)
    .fetch_one(&mut *conn)
    .await?;

    let last_activity: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT MAX(ts) FROM raw_events
        WHERE app_id = ? AND channel_name = ? AND channel_session_id = ?
          AND event_type IN (102, 104, 106, 108) AND ts >= ? AND ts < ?
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(channel_session_id)
    .bind(day_start)
    .bind(day_end)
    .fetch_one(&mut *conn)
    .await?;

    let total_minutes = total_seconds.unwrap_or(0) as f64 / 60.0;

    sqlx::query(
        r#"
        INSERT INTO channel_daily_stats
            (app_id, channel_name, channel_session_id, day, total_users,
             unique_users, total_minutes, first_activity_ts, last_activity_ts,
             updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(app_id, channel_name, channel_session_id, day) DO UPDATE SET
            total_users = excluded.total_users,
            unique_users = excluded.unique_users,
            total_minutes = excluded.total_minutes,
            first_activity_ts = excluded.first_activity_ts,
            last_activity_ts = excluded.last_activity_ts,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(app_id)
    .bind(channel_name)
    .bind(channel_session_id)
    .bind(day)
    .bind(total_users)
    .bind(unique_users)
    .bind(total_minutes)
    .bind(first_activity)
    .bind(last_activity)
    .bind(super::now_ts())
    .execute(conn)
    .await?;

    Ok(())
}

/// Recompute the user rollup for one (uid, channel, day) from scratch.
///
/// The unique key carries no epoch, so totals span every epoch of the
/// channel that day; the stored epoch label is just the latest trigger.
pub(crate) async fn recompute_user_day(
    conn: &mut SqliteConnection,
    app_id: &str,
    uid: i64,
    channel_name: &str,
    channel_session_id: &str,
    day: &str,
    day_start: i64,
    day_end: i64,
) -> Result<(), DbError> {
    let (total_seconds, session_count): (Option<i64>, i64) = sqlx::query_as(
        r#"
        SELECT SUM(duration_seconds), COUNT(*)
        FROM presence_sessions
        WHERE app_id = ? AND uid = ? AND channel_name = ?
          AND join_ts >= ? AND join_ts < ?
        "#,
    )
    .bind(app_id)
    .bind(uid)
    .bind(channel_name)
    .bind(day_start)
    .bind(day_end)
    .fetch_one(&mut *conn)
    .await?;

    let total_minutes = total_seconds.unwrap_or(0) as f64 / 60.0;

    sqlx::query(
        r#"
        INSERT INTO user_daily_stats
            (app_id, uid, channel_name, channel_session_id, day, total_minutes,
             session_count, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(app_id, uid, channel_name, day) DO UPDATE SET
            channel_session_id = excluded.channel_session_id,
            total_minutes = excluded.total_minutes,
            session_count = excluded.session_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(app_id)
    .bind(uid)
    .bind(channel_name)
    .bind(channel_session_id)
    .bind(day)
    .bind(total_minutes)
    .bind(session_count)
    .bind(super::now_ts())
    .execute(conn)
    .await?;

    Ok(())
}

/// Aggregate repository for pool-based reads.
pub struct AggregateRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AggregateRepository<'a> {
    /// Create a new aggregate repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Channel rollup for one (epoch, day), if present.
    pub async fn channel_day(
        &self,
        app_id: &str,
        channel_name: &str,
        channel_session_id: &str,
        day: &str,
    ) -> Result<Option<ChannelDailyRow>, DbError> {
        let row: Option<ChannelDailyRow> = sqlx::query_as(
            r#"
            SELECT app_id, channel_name, channel_session_id, day, total_users,
                   unique_users, total_minutes, first_activity_ts, last_activity_ts
            FROM channel_daily_stats
            WHERE app_id = ? AND channel_name = ? AND channel_session_id = ? AND day = ?
            "#,
        )
        .bind(app_id)
        .bind(channel_name)
        .bind(channel_session_id)
        .bind(day)
        .fetch_optional(self.pool)
        .await?;

        Ok(row)
    }

    /// User rollup for one (uid, channel, day), if present.
    pub async fn user_day(
        &self,
        app_id: &str,
        uid: i64,
        channel_name: &str,
        day: &str,
    ) -> Result<Option<UserDailyRow>, DbError> {
        let row: Option<UserDailyRow> = sqlx::query_as(
            r#"
            SELECT app_id, uid, channel_name, channel_session_id, day,
                   total_minutes, session_count
            FROM user_daily_stats
            WHERE app_id = ? AND uid = ? AND channel_name = ? AND day = ?
            "#,
        )
        .bind(app_id)
        .bind(uid)
        .bind(channel_name)
        .bind(day)
        .fetch_optional(self.pool)
        .await?;

        Ok(row)
    }
}
