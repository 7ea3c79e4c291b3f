//! Quality scoring, reason-code breakdowns, insights and the session-length
//! histogram.
//!
//! Scores start at 100 and lose weighted, per-category-capped penalties; the
//! weights live in configuration (`QualityWeights`) so regressions show up
//! as config diffs rather than silent behavior changes.

use crate::analytics::reconnect::{ReconnectAnalysis, ReconnectPattern};
use crate::config::QualityWeights;
use crate::db::SessionRow;
use callscope_proto::ReasonCode;

/// A session shorter than this many seconds counts as a failed call.
pub const FAILED_CALL_SECS: i64 = 5;

/// Reason-code counters over a session set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReasonBreakdown {
    pub normal_exits: usize,
    pub connection_timeouts: usize,
    pub permission_issues: usize,
    pub server_issues: usize,
    pub device_switches: usize,
    pub ip_switching: usize,
    pub network_failures: usize,
    pub abnormal_leaves: usize,
    pub other_issues: usize,
}

impl ReasonBreakdown {
    pub fn count(sessions: &[SessionRow]) -> Self {
        let mut breakdown = Self::default();
        for session in sessions {
            let Some(reason) = session.reason else {
                continue;
            };
            match ReasonCode::from_code(reason) {
                ReasonCode::Normal => breakdown.normal_exits += 1,
                ReasonCode::ConnectionTimeout => breakdown.connection_timeouts += 1,
                ReasonCode::Permissions => breakdown.permission_issues += 1,
                ReasonCode::ServerLoad => breakdown.server_issues += 1,
                ReasonCode::DeviceSwitch => breakdown.device_switches += 1,
                ReasonCode::IpSwitching => breakdown.ip_switching += 1,
                ReasonCode::NetworkFailure => breakdown.network_failures += 1,
                ReasonCode::AbnormalUser => breakdown.abnormal_leaves += 1,
                ReasonCode::Other => breakdown.other_issues += 1,
            }
        }
        breakdown
    }

    fn network_total(&self) -> usize {
        self.connection_timeouts + self.network_failures + self.ip_switching
    }

    fn control_total(&self) -> usize {
        self.permission_issues + self.device_switches
    }
}

/// Sessions shorter than the failed-call threshold.
pub fn failed_calls(sessions: &[SessionRow]) -> usize {
    sessions
        .iter()
        .filter(|s| s.duration_seconds.unwrap_or(0) < FAILED_CALL_SECS)
        .count()
}

/// Average session length in minutes.
pub fn avg_session_minutes(sessions: &[SessionRow]) -> f64 {
    if sessions.is_empty() {
        return 0.0;
    }
    let total: i64 = sessions.iter().map(|s| s.duration_seconds.unwrap_or(0)).sum();
    total as f64 / 60.0 / sessions.len() as f64
}

/// Session-length histogram with the fixed reporting buckets, in order.
pub fn session_length_histogram(sessions: &[SessionRow]) -> Vec<(&'static str, usize)> {
    let mut buckets = [
        ("0-5s", 0usize),
        ("5-30s", 0),
        ("30-60s", 0),
        ("1-5min", 0),
        ("5-15min", 0),
        ("15min+", 0),
    ];
    for session in sessions {
        let secs = session.duration_seconds.unwrap_or(0);
        let idx = match secs {
            s if s < 5 => 0,
            s if s < 30 => 1,
            s if s < 60 => 2,
            s if s < 300 => 3,
            s if s < 900 => 4,
            _ => 5,
        };
        buckets[idx].1 += 1;
    }
    buckets.to_vec()
}

/// Quality score over a session set, with optional per-user reconnection
/// penalties (channel-level scores pass `None`).
pub fn quality_score(
    sessions: &[SessionRow],
    weights: &QualityWeights,
    reconnect: Option<&ReconnectAnalysis>,
) -> f64 {
    let breakdown = ReasonBreakdown::count(sessions);
    let mut score = 100.0;

    score -= capped(
        breakdown.abnormal_leaves,
        weights.abnormal_penalty,
        weights.abnormal_cap,
    );
    score -= capped(
        breakdown.other_issues,
        weights.unknown_penalty,
        weights.unknown_cap,
    );
    score -= capped(
        breakdown.network_total(),
        weights.network_penalty,
        weights.network_cap,
    );
    score -= capped(
        breakdown.server_issues,
        weights.server_penalty,
        weights.server_cap,
    );
    score -= capped(
        breakdown.control_total(),
        weights.control_penalty,
        weights.control_cap,
    );
    score -= capped(
        failed_calls(sessions),
        weights.failed_call_penalty,
        weights.failed_call_cap,
    );

    if let Some(reconnect) = reconnect {
        match reconnect.pattern {
            ReconnectPattern::Unstable => score -= weights.unstable_penalty,
            ReconnectPattern::Moderate => score -= weights.moderate_penalty,
            _ if reconnect.rapid_reconnections > 0 => score -= weights.rapid_penalty,
            _ => {}
        }
        score -= capped(
            reconnect.burst_sessions,
            weights.burst_penalty,
            weights.burst_cap,
        );
    }

    if !sessions.is_empty() && avg_session_minutes(sessions) < 1.0 {
        score -= weights.short_avg_penalty;
    }

    if !sessions.is_empty() {
        let normal_share = breakdown.normal_exits as f64 / sessions.len() as f64;
        if normal_share > weights.normal_exit_ratio {
            score += weights.normal_exit_bonus;
        }
    }

    score.clamp(0.0, 100.0)
}

fn capped(count: usize, penalty: f64, cap: f64) -> f64 {
    if count == 0 {
        0.0
    } else {
        (count as f64 * penalty).min(cap)
    }
}

/// Deterministic, tagged insight strings from the same counters.
///
/// Tags encode severity: `high:`, `medium:`, `low:`, `ok:`, `note:`.
pub fn insights(sessions: &[SessionRow], weights: &QualityWeights) -> Vec<String> {
    let breakdown = ReasonBreakdown::count(sessions);
    let failed = failed_calls(sessions);
    let avg_minutes = avg_session_minutes(sessions);
    let score = quality_score(sessions, weights, None);
    let mut out = Vec::new();

    if breakdown.abnormal_leaves > 0 {
        out.push(format!(
            "high: {} abnormal leaves (reason 999), frequent join/leave",
            breakdown.abnormal_leaves
        ));
    }
    if breakdown.other_issues > 0 {
        out.push(format!(
            "high: {} unknown-reason exits (reason 0), investigate further",
            breakdown.other_issues
        ));
    }
    if breakdown.connection_timeouts > 0 {
        out.push(format!(
            "medium: {} connection timeouts (reason 2), network instability",
            breakdown.connection_timeouts
        ));
    }
    if breakdown.network_failures > 0 {
        out.push(format!(
            "medium: {} network failures (reason 10), check connectivity",
            breakdown.network_failures
        ));
    }
    if breakdown.ip_switching > 0 {
        out.push(format!(
            "medium: {} multiple-IP switches (reason 9), VPN or roaming clients",
            breakdown.ip_switching
        ));
    }
    if breakdown.server_issues > 0 {
        out.push(format!(
            "medium: {} server load adjustments (reason 4)",
            breakdown.server_issues
        ));
    }
    if breakdown.permission_issues > 0 {
        out.push(format!(
            "low: {} permission changes (reason 3), admin actions",
            breakdown.permission_issues
        ));
    }
    if breakdown.device_switches > 0 {
        out.push(format!(
            "low: {} device switches (reason 5), user behavior",
            breakdown.device_switches
        ));
    }
    if breakdown.normal_exits > 0 {
        out.push(format!(
            "ok: {} normal exits (reason 1)",
            breakdown.normal_exits
        ));
    }
    if failed > 0 {
        out.push(format!("note: {failed} failed calls (duration under 5s)"));
    }
    if single_user_epoch(sessions) {
        out.push("note: single-user channel, likely a test call".to_string());
    }
    if !sessions.is_empty() && avg_minutes < 1.0 {
        out.push(format!(
            "note: short average session length ({avg_minutes:.1} minutes)"
        ));
    }

    if score < 50.0 {
        out.push("high: poor quality indicators overall".to_string());
    } else if score < 80.0 {
        out.push("medium: moderate quality indicators overall".to_string());
    } else {
        out.push("ok: good quality indicators overall".to_string());
    }

    out
}

/// Whether all sessions belong to a single user.
pub fn single_user_epoch(sessions: &[SessionRow]) -> bool {
    let mut uids = sessions.iter().map(|s| s.uid);
    match uids.next() {
        Some(first) => uids.all(|u| u == first),
        None => false,
    }
}
