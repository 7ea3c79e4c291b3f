//! Analytics engine: read-only derivations over reconciled rows.
//!
//! Everything in here is a pure function of session and role-event rows,
//! which keeps it unit-testable without a store. The HTTP layer fetches the
//! rows and composes these.

pub mod concurrency;
pub mod minutes;
pub mod quality;
pub mod reconnect;
pub mod roles;

pub use concurrency::{Concurrency, max_concurrency};
pub use minutes::{BreakdownBy, MinutesQuery, MinutesReport, Period};
pub use quality::{ReasonBreakdown, quality_score, session_length_histogram};
pub use reconnect::{ReconnectAnalysis, analyze as analyze_reconnects};
pub use roles::{RoleMinutes, role_minutes};

use crate::db::SessionRow;

/// Wall-clock minutes of an epoch: max leave minus min join.
pub fn wall_clock_minutes(sessions: &[SessionRow]) -> Option<f64> {
    let min_join = sessions.iter().map(|s| s.join_ts).min()?;
    let max_leave = sessions.iter().filter_map(|s| s.leave_ts).max()?;
    if max_leave <= min_join {
        return None;
    }
    Some((max_leave - min_join) as f64 / 60.0)
}

/// Sum of session durations in minutes.
pub fn user_minutes(sessions: &[SessionRow]) -> f64 {
    sessions
        .iter()
        .map(|s| s.duration_seconds.unwrap_or(0))
        .sum::<i64>() as f64
        / 60.0
}

/// Utilization: user-minutes over wall-clock minutes.
pub fn utilization(sessions: &[SessionRow]) -> Option<f64> {
    let wall = wall_clock_minutes(sessions)?;
    if wall <= 0.0 {
        return None;
    }
    Some(user_minutes(sessions) / wall)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(uid: i64, join_ts: i64, leave_ts: i64) -> SessionRow {
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
            last_client_seq: None,
            product_id: None,
            platform: None,
            reason: Some(1),
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
    fn utilization_is_user_minutes_over_wall_minutes() {
        // Two users fully overlapping a 10-minute call.
        let sessions = [session(1, 0, 600), session(2, 0, 600)];
        assert_eq!(wall_clock_minutes(&sessions), Some(10.0));
        assert_eq!(user_minutes(&sessions), 20.0);
        assert_eq!(utilization(&sessions), Some(2.0));
    }

    #[test]
    fn wall_clock_requires_a_closed_session() {
        let mut open = session(1, 0, 600);
        open.leave_ts = None;
        assert_eq!(wall_clock_minutes(&[open]), None);
    }
}
