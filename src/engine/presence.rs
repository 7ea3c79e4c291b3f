//! Per-user presence session mutation: join, leave, role change.
//!
//! Runs inside the ingest transaction. Ordering repairs lean on two facts:
//! `client_seq` is monotonic per user, and `payload.ts` is authoritative.
//! A leave can arrive before its join, a role change before its session
//! exists, and duplicates of everything; each handler converges on the same
//! rows regardless.

use crate::db::{self, DbError, NewSession};
use crate::metrics;
use callscope_proto::{EventKind, Notification, Role};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

/// One user event, already deduplicated and epoch-resolved.
pub(crate) struct UserEvent<'a> {
    pub app_id: &'a str,
    pub kind: EventKind,
    pub epoch_label: &'a str,
    pub uid: i64,
    pub client_seq: i64,
    pub notification: &'a Notification,
}

impl<'a> UserEvent<'a> {
    fn channel(&self) -> &'a str {
        &self.notification.payload.channel_name
    }

    fn ts(&self) -> i64 {
        self.notification.payload.ts
    }
}

/// Handle a join (103/105/107).
pub(crate) async fn handle_join(
    conn: &mut SqliteConnection,
    ev: &UserEvent<'_>,
) -> Result<(), DbError> {
    let payload = &ev.notification.payload;
    let existing =
        db::find_open_session(conn, ev.app_id, ev.channel(), ev.epoch_label, ev.uid).await?;

    if let Some(session) = existing {
        // client_seq watermark: anything at or below it is a stale replay.
        if let Some(last_seq) = session.last_client_seq
            && ev.client_seq <= last_seq
        {
            debug!(
                uid = ev.uid,
                client_seq = ev.client_seq,
                last_seq,
                "Ignoring stale join"
            );
            return Ok(());
        }

        if ev.ts() < session.join_ts {
            warn!(
                uid = ev.uid,
                recorded = session.join_ts,
                new = ev.ts(),
                "Out-of-order join, rewinding join time"
            );
        }
        // Earlier ts rewinds the join; a later one is a reconnection
        // heartbeat. Both refresh the join time and the seq watermark.
        db::refresh_session_join(
            conn,
            session.id,
            ev.ts(),
            ev.client_seq,
            payload.account.as_deref(),
        )
        .await?;
        return Ok(());
    }

    let role = ev.kind.implied_role().unwrap_or(Role::Audience);
    let session_id = db::insert_session(
        conn,
        &NewSession {
            app_id: ev.app_id,
            channel_name: ev.channel(),
            channel_session_id: ev.epoch_label,
            sid: ev.notification.sid.as_deref(),
            uid: ev.uid,
            join_ts: ev.ts(),
            leave_ts: None,
            duration_seconds: None,
            last_client_seq: Some(ev.client_seq),
            product_id: Some(ev.notification.product_id),
            platform: payload.platform,
            reason: payload.reason,
            client_type: payload.client_type,
            account: payload.account.as_deref(),
            is_host: role == Role::Host,
            communication_mode: ev.kind.communication_mode(),
        },
    )
    .await?;
    metrics::SESSIONS_OPENED.inc();
    info!(
        uid = ev.uid,
        channel = %ev.channel(),
        epoch = %ev.epoch_label,
        role = %role,
        "Opened presence session"
    );

    // Replay role switches that arrived before this join. Each one both
    // moves the current role and counts as a switch.
    let pending = db::pending_role_events(
        conn,
        ev.app_id,
        ev.channel(),
        ev.epoch_label,
        ev.uid,
        ev.ts(),
    )
    .await?;
    for role_event in &pending {
        let to_host = role_event.new_role == Role::Host.as_str();
        db::update_session_role(conn, session_id, to_host).await?;
    }
    if !pending.is_empty() {
        info!(
            uid = ev.uid,
            count = pending.len(),
            "Applied queued role changes to new session"
        );
    }

    Ok(())
}

/// Handle a leave (104/106/108).
pub(crate) async fn handle_leave(
    conn: &mut SqliteConnection,
    ev: &UserEvent<'_>,
) -> Result<(), DbError> {
    let payload = &ev.notification.payload;
    let leave_ts = ev.ts();

    let open = db::find_open_session_any_epoch(conn, ev.app_id, ev.channel(), ev.uid).await?;

    if let Some(session) = open {
        let join_ts = if leave_ts < session.join_ts {
            // Leave arrived with a ts before the recorded join; trust the
            // payload duration to reconstruct the actual join.
            let adjusted = leave_ts - payload.duration.unwrap_or(0);
            warn!(
                uid = ev.uid,
                recorded = session.join_ts,
                leave = leave_ts,
                adjusted,
                "Leave precedes recorded join, adjusting join time"
            );
            adjusted
        } else {
            session.join_ts
        };

        db::close_session(
            conn,
            session.id,
            join_ts,
            leave_ts,
            payload.reason,
            payload.account.as_deref(),
            ev.notification.sid.as_deref(),
        )
        .await?;
        metrics::SESSIONS_CLOSED.inc();
        info!(
            uid = ev.uid,
            channel = %ev.channel(),
            duration = leave_ts - join_ts,
            reason = ?payload.reason,
            "Closed presence session"
        );
        return Ok(());
    }

    if let Some(duration) = payload.duration {
        // No open session, but the leave tells us how long the user was
        // there: synthesize the whole closed session from it.
        let role = ev.kind.implied_role().unwrap_or(Role::Audience);
        db::insert_session(
            conn,
            &NewSession {
                app_id: ev.app_id,
                channel_name: ev.channel(),
                channel_session_id: ev.epoch_label,
                sid: ev.notification.sid.as_deref(),
                uid: ev.uid,
                join_ts: leave_ts - duration,
                leave_ts: Some(leave_ts),
                duration_seconds: Some(duration),
                last_client_seq: Some(ev.client_seq),
                product_id: Some(ev.notification.product_id),
                platform: payload.platform,
                reason: payload.reason,
                client_type: payload.client_type,
                account: payload.account.as_deref(),
                is_host: role == Role::Host,
                communication_mode: ev.kind.communication_mode(),
            },
        )
        .await?;
        metrics::SESSIONS_SYNTHESIZED.inc();
        info!(
            uid = ev.uid,
            channel = %ev.channel(),
            duration,
            "Synthesized session from orphan leave"
        );
        return Ok(());
    }

    // Nothing to close and no duration to reconstruct from.
    warn!(
        uid = ev.uid,
        channel = %ev.channel(),
        ts = leave_ts,
        "Dropping leave with no open session and no duration"
    );
    Ok(())
}

/// Handle a role change (111/112).
pub(crate) async fn handle_role_change(
    conn: &mut SqliteConnection,
    ev: &UserEvent<'_>,
) -> Result<(), DbError> {
    let Some(role) = ev.kind.role_target() else {
        return Ok(());
    };

    db::insert_role_event(
        conn,
        ev.app_id,
        ev.channel(),
        ev.epoch_label,
        ev.uid,
        ev.ts(),
        role.as_str(),
    )
    .await?;
    metrics::ROLE_EVENTS.inc();

    // Epoch-exact match first, then any open session in the channel; a role
    // change can land while the session still carries a provisional label.
    let session = match db::find_open_session(conn, ev.app_id, ev.channel(), ev.epoch_label, ev.uid)
        .await?
    {
        Some(session) => Some(session),
        None => db::find_open_session_any_epoch(conn, ev.app_id, ev.channel(), ev.uid).await?,
    };

    match session {
        Some(session) => {
            db::update_session_role(conn, session.id, role == Role::Host).await?;
            info!(
                uid = ev.uid,
                channel = %ev.channel(),
                role = %role,
                switches = session.role_switches + 1,
                "Applied role change"
            );
        }
        None => {
            // Stays queued in role_events; the next matching join replays it.
            debug!(
                uid = ev.uid,
                channel = %ev.channel(),
                role = %role,
                "Role change with no open session, queued for next join"
            );
        }
    }

    Ok(())
}
