//! Reconnection-pattern analysis.
//!
//! Multiple sessions for one user inside the same epoch are reconnections.
//! Gaps between consecutive sessions classify the behavior: a gap of at
//! most 30 seconds is a burst, at most 120 seconds a rapid reconnect.

use crate::db::SessionRow;
use std::collections::HashMap;

const BURST_GAP_SECS: i64 = 30;
const RAPID_GAP_SECS: i64 = 120;

/// Stability classification for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPattern {
    Unstable,
    Moderate,
    Stable,
    NoReconnections,
}

impl ReconnectPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstable => "unstable",
            Self::Moderate => "moderate",
            Self::Stable => "stable",
            Self::NoReconnections => "no_reconnections",
        }
    }
}

/// Reconnection summary for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectAnalysis {
    pub reconnection_count: usize,
    pub burst_sessions: usize,
    pub rapid_reconnections: usize,
    pub avg_gap_minutes: f64,
    pub pattern: ReconnectPattern,
}

impl Default for ReconnectAnalysis {
    fn default() -> Self {
        Self {
            reconnection_count: 0,
            burst_sessions: 0,
            rapid_reconnections: 0,
            avg_gap_minutes: 0.0,
            pattern: ReconnectPattern::NoReconnections,
        }
    }
}

/// Analyze one user's sessions, grouping by epoch.
pub fn analyze(sessions: &[SessionRow]) -> ReconnectAnalysis {
    let mut by_epoch: HashMap<&str, Vec<&SessionRow>> = HashMap::new();
    for session in sessions {
        by_epoch
            .entry(session.channel_session_id.as_str())
            .or_default()
            .push(session);
    }

    let mut reconnection_count = 0;
    let mut burst_sessions = 0;
    let mut rapid_reconnections = 0;
    let mut gaps: Vec<i64> = Vec::new();

    for group in by_epoch.values_mut() {
        if group.len() <= 1 {
            continue;
        }
        group.sort_by_key(|s| s.join_ts);
        reconnection_count += group.len() - 1;

        for pair in group.windows(2) {
            let Some(prev_leave) = pair[0].leave_ts else {
                continue;
            };
            let gap = pair[1].join_ts - prev_leave;
            gaps.push(gap);
            if gap <= RAPID_GAP_SECS {
                rapid_reconnections += 1;
            }
            if gap <= BURST_GAP_SECS {
                burst_sessions += 1;
            }
        }
    }

    let avg_gap_minutes = if gaps.is_empty() {
        0.0
    } else {
        gaps.iter().sum::<i64>() as f64 / gaps.len() as f64 / 60.0
    };

    let pattern = if rapid_reconnections >= 3 {
        ReconnectPattern::Unstable
    } else if rapid_reconnections >= 1 {
        ReconnectPattern::Moderate
    } else if reconnection_count > 0 {
        ReconnectPattern::Stable
    } else {
        ReconnectPattern::NoReconnections
    };

    ReconnectAnalysis {
        reconnection_count,
        burst_sessions,
        rapid_reconnections,
        avg_gap_minutes,
        pattern,
    }
}
