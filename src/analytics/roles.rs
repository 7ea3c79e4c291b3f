//! Role-interval attribution.
//!
//! Splits each closed presence session into host and audience segments at
//! its role-change timestamps. The tricky part is the role the user held at
//! join time, which the session row alone cannot prove once switches have
//! overwritten `is_host`; inference runs through three levels of evidence.

use crate::db::{JoinEventRow, RoleEventRow, SessionRow};
use callscope_proto::{EventKind, Role};
use std::collections::HashMap;

/// Host/audience minute totals for a set of sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoleMinutes {
    pub host_minutes: f64,
    pub audience_minutes: f64,
}

impl RoleMinutes {
    pub fn total(&self) -> f64 {
        self.host_minutes + self.audience_minutes
    }
}

/// Attribute minutes to roles for all sessions of one epoch.
///
/// `role_events` must belong to the same epoch; `join_hints` are the join
/// webhook rows for the channel, used to pin the initial role within
/// `tolerance_secs` of a session's recorded join. Sessions missing a leave
/// time contribute nothing.
pub fn role_minutes(
    sessions: &[SessionRow],
    role_events: &[RoleEventRow],
    join_hints: &[JoinEventRow],
    tolerance_secs: i64,
) -> RoleMinutes {
    let mut totals = RoleMinutes::default();

    // Per-user role timelines, each already ascending by ts.
    let mut by_user: HashMap<i64, Vec<&RoleEventRow>> = HashMap::new();
    for re in role_events {
        by_user.entry(re.uid).or_default().push(re);
    }
    for events in by_user.values_mut() {
        events.sort_by_key(|re| re.ts);
    }

    for session in sessions {
        let Some(leave_ts) = session.leave_ts else {
            continue;
        };
        let join_ts = session.join_ts;

        let empty = Vec::new();
        let user_events = by_user.get(&session.uid).unwrap_or(&empty);
        let in_session: Vec<&RoleEventRow> = user_events
            .iter()
            .filter(|re| join_ts <= re.ts && re.ts <= leave_ts)
            .copied()
            .collect();

        let initial = initial_role(session, &in_session, join_hints, tolerance_secs);

        let mut current = initial;
        let mut last_ts = join_ts;
        for re in &in_session {
            if re.ts > last_ts {
                add_segment(&mut totals, current, re.ts - last_ts);
                last_ts = re.ts;
            }
            current = Role::from_str(&re.new_role).unwrap_or(current);
        }
        if leave_ts > last_ts {
            add_segment(&mut totals, current, leave_ts - last_ts);
        }
    }

    totals
}

fn add_segment(totals: &mut RoleMinutes, role: Role, seconds: i64) {
    let minutes = seconds as f64 / 60.0;
    match role {
        Role::Host => totals.host_minutes += minutes,
        Role::Audience => totals.audience_minutes += minutes,
    }
}

/// Initial-role precedence: join webhook near the session's join, then the
/// inverse of the first switch, then the session's own flag.
fn initial_role(
    session: &SessionRow,
    in_session: &[&RoleEventRow],
    join_hints: &[JoinEventRow],
    tolerance_secs: i64,
) -> Role {
    let hint = join_hints
        .iter()
        .filter(|h| {
            h.uid == session.uid && (h.ts - session.join_ts).abs() <= tolerance_secs
        })
        .min_by_key(|h| (h.ts - session.join_ts).abs());
    if let Some(hint) = hint
        && let Some(kind) = EventKind::from_code(hint.event_type)
        && let Some(role) = kind.implied_role()
    {
        return role;
    }

    if let Some(first) = in_session.first()
        && let Some(switched_to) = Role::from_str(&first.new_role)
    {
        // The pre-switch role is whatever the first switch left behind.
        return switched_to.opposite();
    }

    if session.is_host { Role::Host } else { Role::Audience }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(uid: i64, join_ts: i64, leave_ts: i64, is_host: bool) -> SessionRow {
        SessionRow {
            id: uid,
            app_id: "app".into(),
            channel_name: "ch".into(),
            channel_session_id: "app_ch_0".into(),
            sid: None,
            uid,
            join_ts,
            leave_ts: Some(leave_ts),
            duration_seconds: Some(leave_ts - join_ts),
            last_client_seq: Some(1),
            product_id: Some(1),
            platform: Some(7),
            reason: Some(1),
            client_type: None,
            account: None,
            is_host,
            communication_mode: 0,
            role_switches: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn role_event(uid: i64, ts: i64, role: Role) -> RoleEventRow {
        RoleEventRow {
            id: 0,
            app_id: "app".into(),
            channel_name: "ch".into(),
            channel_session_id: "app_ch_0".into(),
            uid,
            ts,
            new_role: role.as_str().into(),
        }
    }

    #[test]
    fn no_switches_uses_session_flag() {
        let sessions = [session(1, 100, 400, true)];
        let totals = role_minutes(&sessions, &[], &[], 5);
        assert_eq!(totals.host_minutes, 5.0);
        assert_eq!(totals.audience_minutes, 0.0);
    }

    #[test]
    fn mid_session_switch_splits_minutes() {
        // Audience 10..40, host 40..70.
        let sessions = [session(7, 10, 70, true)];
        let events = [role_event(7, 40, Role::Host)];
        let totals = role_minutes(&sessions, &events, &[], 5);
        assert_eq!(totals.host_minutes, 0.5);
        assert_eq!(totals.audience_minutes, 0.5);
    }

    #[test]
    fn join_hint_beats_inference() {
        // Session flag says host, but the join webhook (within tolerance)
        // was an audience join and no switch happened.
        let sessions = [session(3, 100, 160, true)];
        let hints = [JoinEventRow {
            uid: 3,
            event_type: 105,
            ts: 103,
        }];
        let totals = role_minutes(&sessions, &[], &hints, 5);
        assert_eq!(totals.audience_minutes, 1.0);
        assert_eq!(totals.host_minutes, 0.0);
    }

    #[test]
    fn join_hint_outside_tolerance_ignored() {
        let sessions = [session(3, 100, 160, true)];
        let hints = [JoinEventRow {
            uid: 3,
            event_type: 105,
            ts: 110,
        }];
        let totals = role_minutes(&sessions, &[], &hints, 5);
        assert_eq!(totals.host_minutes, 1.0);
    }

    #[test]
    fn initial_role_inferred_from_first_switch() {
        // First event switches TO host, so the user started as audience,
        // even though the session row already reads host.
        let sessions = [session(9, 0, 120, true)];
        let events = [role_event(9, 60, Role::Host)];
        let totals = role_minutes(&sessions, &events, &[], 5);
        assert_eq!(totals.audience_minutes, 1.0);
        assert_eq!(totals.host_minutes, 1.0);
    }

    #[test]
    fn open_sessions_contribute_nothing() {
        let mut open = session(1, 100, 400, true);
        open.leave_ts = None;
        open.duration_seconds = None;
        let totals = role_minutes(&[open], &[], &[], 5);
        assert_eq!(totals.total(), 0.0);
    }

    #[test]
    fn minutes_conserve_across_switches() {
        let sessions = [session(5, 0, 3600, false)];
        let events = [
            role_event(5, 700, Role::Host),
            role_event(5, 1900, Role::Audience),
            role_event(5, 2500, Role::Host),
        ];
        let totals = role_minutes(&sessions, &events, &[], 5);
        assert!((totals.total() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn switch_at_boundary_timestamps() {
        // A switch at the exact join ts changes the role without creating a
        // zero-length segment; one at the leave ts adds nothing after it.
        let sessions = [session(2, 100, 220, false)];
        let events = [
            role_event(2, 100, Role::Host),
            role_event(2, 220, Role::Audience),
        ];
        // Initial role inferred from first event: opposite of host = audience,
        // but the switch applies immediately at ts=100.
        let totals = role_minutes(&sessions, &events, &[], 5);
        assert_eq!(totals.host_minutes, 2.0);
        assert_eq!(totals.audience_minutes, 0.0);
    }
}
