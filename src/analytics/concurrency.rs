//! Max-concurrency computation from join/leave pairs.

use crate::db::SessionRow;

/// Concurrency summary for one epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Concurrency {
    pub max_concurrent: i64,
    /// Earliest timestamp at which the maximum was reached.
    pub peak_ts: Option<i64>,
    /// Step curve: running occupancy after each join/leave, ascending by ts.
    pub curve: Vec<(i64, i64)>,
}

/// Walk the join/leave deltas of a session set.
///
/// Ties at identical timestamps process leaves before joins; the other
/// order shows a user double-counted for an instant and inflates the max.
pub fn max_concurrency(sessions: &[SessionRow]) -> Concurrency {
    let mut events: Vec<(i64, i64)> = Vec::with_capacity(sessions.len() * 2);
    for session in sessions {
        events.push((session.join_ts, 1));
        if let Some(leave_ts) = session.leave_ts {
            events.push((leave_ts, -1));
        }
    }
    if events.is_empty() {
        return Concurrency::default();
    }

    // -1 sorts before +1, so leaves win ties.
    events.sort_by_key(|&(ts, delta)| (ts, delta));

    let mut current = 0i64;
    let mut max_concurrent = 0i64;
    let mut peak_ts = None;
    let mut curve = Vec::with_capacity(events.len());

    for (ts, delta) in events {
        current += delta;
        curve.push((ts, current));
        if current > max_concurrent {
            max_concurrent = current;
            peak_ts = Some(ts);
        }
    }

    Concurrency {
        max_concurrent,
        peak_ts,
        curve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(uid: i64, join_ts: i64, leave_ts: Option<i64>) -> SessionRow {
        SessionRow {
            id: uid,
            app_id: "app".into(),
            channel_name: "ch".into(),
            channel_session_id: "app_ch_0".into(),
            sid: None,
            uid,
            join_ts,
            leave_ts,
            duration_seconds: leave_ts.map(|l| l - join_ts),
            last_client_seq: None,
            product_id: None,
            platform: None,
            reason: None,
            client_type: None,
            account: None,
            is_host: false,
            communication_mode: 0,
            role_switches: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn empty_input() {
        let c = max_concurrency(&[]);
        assert_eq!(c.max_concurrent, 0);
        assert_eq!(c.peak_ts, None);
        assert!(c.curve.is_empty());
    }

    #[test]
    fn overlapping_sessions_stack() {
        let sessions = [
            session(1, 100, Some(200)),
            session(2, 150, Some(250)),
            session(3, 160, Some(170)),
        ];
        let c = max_concurrency(&sessions);
        assert_eq!(c.max_concurrent, 3);
        assert_eq!(c.peak_ts, Some(160));
    }

    #[test]
    fn leave_before_join_at_same_ts() {
        // One user leaves exactly when another joins: occupancy never
        // exceeds 1 at that instant.
        let sessions = [session(1, 100, Some(150)), session(2, 150, Some(200))];
        let c = max_concurrency(&sessions);
        assert_eq!(c.max_concurrent, 1);
        assert_eq!(c.peak_ts, Some(100));
    }

    #[test]
    fn open_sessions_never_decrement() {
        let sessions = [session(1, 100, None), session(2, 110, None)];
        let c = max_concurrency(&sessions);
        assert_eq!(c.max_concurrent, 2);
        assert_eq!(c.curve, vec![(100, 1), (110, 2)]);
    }

    #[test]
    fn curve_matches_membership_at_each_step() {
        let sessions = [
            session(1, 10, Some(40)),
            session(2, 20, Some(30)),
            session(3, 30, Some(50)),
        ];
        let c = max_concurrency(&sessions);
        // At every curve point, occupancy equals |{join <= ts < leave}|
        // once same-ts leave/join pairs settle.
        assert_eq!(
            c.curve,
            vec![(10, 1), (20, 2), (30, 1), (30, 2), (40, 1), (50, 0)]
        );
        assert_eq!(c.max_concurrent, 2);
        assert_eq!(c.peak_ts, Some(20));
    }
}
