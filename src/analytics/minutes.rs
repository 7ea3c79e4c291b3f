//! Day-split minute series.
//!
//! Splits each session's presence interval across UTC calendar days, then
//! buckets the pieces by day or month under a breakdown key. The emitted
//! axis is gap-free and zero-filled so every series aligns index-for-index
//! with the date list.

use crate::db::SessionRow;
use callscope_proto::{Role, client_type_name, platform_name};
use chrono::{DateTime, Datelike, Days, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Day,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BreakdownBy {
    #[default]
    Role,
    Platform,
}

/// Minutes analytics query, after HTTP-layer parsing.
#[derive(Debug, Clone)]
pub struct MinutesQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period: Period,
    /// Platform filter; empty means all platforms.
    pub platforms: Vec<i64>,
    /// Client-type filter; `None` entries select the NULL client type,
    /// which only exists on Linux.
    pub client_types: Vec<Option<i64>>,
    /// Role filter; empty means both roles.
    pub roles: Vec<Role>,
    pub breakdown_by: BreakdownBy,
}

impl MinutesQuery {
    /// Effective date range: month periods widen to whole months.
    pub fn effective_range(&self) -> (NaiveDate, NaiveDate) {
        match self.period {
            Period::Day => (self.start, self.end),
            Period::Month => (first_of_month(self.start), last_of_month(self.end)),
        }
    }

    /// Unix-second bounds of the effective range, end-exclusive.
    pub fn range_ts(&self) -> (i64, i64) {
        let (start, end) = self.effective_range();
        (day_start_ts(start), day_start_ts(next_day(end)))
    }
}

/// One axis entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateKey {
    pub key: String,
    pub display: String,
}

/// Grouping key of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKey {
    Role {
        role: Role,
        client_type: Option<i64>,
    },
    Platform {
        platform: Option<i64>,
        client_type: Option<i64>,
    },
}

impl SeriesKey {
    pub fn label(&self) -> String {
        match self {
            SeriesKey::Role { role, client_type } => {
                let role_label = match role {
                    Role::Host => "Host",
                    Role::Audience => "Audience",
                };
                match client_type {
                    Some(ct) => format!("{} - {}", role_label, client_type_name(*ct)),
                    None => format!("{role_label} - None"),
                }
            }
            SeriesKey::Platform {
                platform,
                client_type,
            } => {
                let platform_label = match platform {
                    Some(p) => platform_name(*p),
                    None => "Unknown Platform".to_string(),
                };
                match client_type {
                    Some(ct) => format!("{} - {}", platform_label, client_type_name(*ct)),
                    None => format!("{platform_label} - None"),
                }
            }
        }
    }

    /// NULL client types sort ahead of id 0, hence the -1 sentinel.
    fn sort_key(&self) -> (i64, &'static str, i64) {
        match self {
            SeriesKey::Role { role, client_type } => {
                (0, role.as_str(), client_type.unwrap_or(-1))
            }
            SeriesKey::Platform {
                platform,
                client_type,
            } => (platform.unwrap_or(0), "", client_type.unwrap_or(-1)),
        }
    }

    pub fn client_type(&self) -> Option<i64> {
        match self {
            SeriesKey::Role { client_type, .. } | SeriesKey::Platform { client_type, .. } => {
                *client_type
            }
        }
    }
}

/// One emitted series, aligned to the report's date axis.
#[derive(Debug, Clone)]
pub struct MinutesSeries {
    pub key: SeriesKey,
    pub label: String,
    pub data: Vec<f64>,
    pub total_minutes: f64,
}

/// Full minutes report.
#[derive(Debug, Clone)]
pub struct MinutesReport {
    pub dates: Vec<DateKey>,
    pub series: Vec<MinutesSeries>,
    pub total_minutes: f64,
    /// Per-date totals across all series.
    pub totals_per_date: Vec<f64>,
}

/// Build the minutes report for sessions overlapping the query range.
///
/// `now_ts` caps still-open sessions: an incomplete session counts from its
/// join up to `min(range end, now)`.
pub fn minutes_report(sessions: &[SessionRow], query: &MinutesQuery, now_ts: i64) -> MinutesReport {
    let (range_start, range_end) = query.effective_range();
    let range_start_ts = day_start_ts(range_start);
    let range_end_ts = day_start_ts(next_day(range_end));

    // Accumulate minutes per (series key, bucket key).
    let mut buckets: HashMap<SeriesKey, HashMap<String, f64>> = HashMap::new();

    for session in sessions {
        if !passes_filters(session, query) {
            continue;
        }

        let join_ts = session.join_ts;
        let leave_ts = session
            .leave_ts
            .unwrap_or_else(|| now_ts.min(range_end_ts));
        if leave_ts <= join_ts {
            continue;
        }

        let key = series_key(session, query.breakdown_by);
        let series = buckets.entry(key).or_default();

        // Walk the UTC days the clamped interval touches.
        let lo = join_ts.max(range_start_ts);
        let hi = leave_ts.min(range_end_ts);
        if hi <= lo {
            continue;
        }
        let mut day_start = lo.div_euclid(86_400) * 86_400;
        while day_start < hi {
            let day_end = day_start + 86_400;
            let seg_start = lo.max(day_start);
            let seg_end = hi.min(day_end);
            if seg_end > seg_start {
                let bucket = bucket_key(day_start, query.period);
                *series.entry(bucket).or_insert(0.0) += (seg_end - seg_start) as f64 / 60.0;
            }
            day_start = day_end;
        }
    }

    let dates = date_axis(range_start, range_end, query.period);

    // Materialize aligned, rounded series; drop all-zero ones.
    let mut keys: Vec<SeriesKey> = buckets.keys().copied().collect();
    keys.sort_by_key(|k| k.sort_key());

    let mut series_out = Vec::new();
    for key in keys {
        let per_bucket = &buckets[&key];
        let data: Vec<f64> = dates
            .iter()
            .map(|d| round2(per_bucket.get(&d.key).copied().unwrap_or(0.0)))
            .collect();
        let total: f64 = round2(data.iter().sum());
        if total > 0.0 {
            series_out.push(MinutesSeries {
                label: key.label(),
                key,
                data,
                total_minutes: total,
            });
        }
    }

    let totals_per_date: Vec<f64> = (0..dates.len())
        .map(|i| round2(series_out.iter().map(|s| s.data[i]).sum()))
        .collect();
    let total_minutes = round2(series_out.iter().map(|s| s.total_minutes).sum());

    MinutesReport {
        dates,
        series: series_out,
        total_minutes,
        totals_per_date,
    }
}

fn passes_filters(session: &SessionRow, query: &MinutesQuery) -> bool {
    let wants_null_client = query.client_types.iter().any(|ct| ct.is_none());

    // Platform filter, widened to Linux when the NULL client type is
    // requested (NULL client types only exist there). A NULL-client query
    // with no platform filter narrows to Linux alone.
    let mut platforms = query.platforms.clone();
    if wants_null_client && !platforms.contains(&6) {
        platforms.push(6);
    }
    if !platforms.is_empty() {
        match session.platform {
            Some(p) if platforms.contains(&p) => {}
            _ => return false,
        }
    }

    if !query.client_types.is_empty() {
        let matches_null = session.client_type.is_none()
            && session.platform == Some(6)
            && wants_null_client;
        let matches_regular = match session.client_type {
            Some(ct) => query.client_types.contains(&Some(ct)),
            None => false,
        };
        if !matches_null && !matches_regular {
            return false;
        }
    }

    if !query.roles.is_empty() {
        let role = if session.is_host {
            Role::Host
        } else {
            Role::Audience
        };
        if !query.roles.contains(&role) {
            return false;
        }
    }

    true
}

fn series_key(session: &SessionRow, breakdown: BreakdownBy) -> SeriesKey {
    match breakdown {
        BreakdownBy::Role => SeriesKey::Role {
            role: if session.is_host {
                Role::Host
            } else {
                Role::Audience
            },
            client_type: session.client_type,
        },
        BreakdownBy::Platform => SeriesKey::Platform {
            platform: session.platform,
            client_type: session.client_type,
        },
    }
}

fn bucket_key(day_start_ts: i64, period: Period) -> String {
    match DateTime::from_timestamp(day_start_ts, 0) {
        Some(dt) => match period {
            Period::Day => dt.format("%Y-%m-%d").to_string(),
            Period::Month => dt.format("%Y-%m").to_string(),
        },
        None => String::new(),
    }
}

fn date_axis(start: NaiveDate, end: NaiveDate, period: Period) -> Vec<DateKey> {
    let mut out = Vec::new();
    match period {
        Period::Day => {
            let mut current = start;
            while current <= end {
                out.push(DateKey {
                    key: current.format("%Y-%m-%d").to_string(),
                    display: current.format("%b %d, %Y").to_string(),
                });
                current = next_day(current);
            }
        }
        Period::Month => {
            let mut current = first_of_month(start);
            while current <= end {
                out.push(DateKey {
                    key: current.format("%Y-%m").to_string(),
                    display: current.format("%B %Y").to_string(),
                });
                current = next_month(current);
            }
        }
    }
    out
}

fn day_start_ts(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

fn next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    next_month(first_of_month(date))
        .pred_opt()
        .unwrap_or(date)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(
        uid: i64,
        join_ts: i64,
        leave_ts: Option<i64>,
        is_host: bool,
        platform: Option<i64>,
        client_type: Option<i64>,
    ) -> SessionRow {
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
            product_id: Some(1),
            platform,
            reason: Some(1),
            client_type,
            account: None,
            is_host,
            communication_mode: 0,
            role_switches: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn query(start: &str, end: &str) -> MinutesQuery {
        MinutesQuery {
            start: start.parse().unwrap(),
            end: end.parse().unwrap(),
            period: Period::Day,
            platforms: vec![],
            client_types: vec![],
            roles: vec![],
            breakdown_by: BreakdownBy::Role,
        }
    }

    // 2024-04-22 00:00:00 UTC, a Monday.
    const MON: i64 = 1_713_744_000;

    #[test]
    fn midnight_straddling_session_splits_evenly() {
        // Mon 23:30 .. Tue 00:30.
        let sessions = [session(
            1,
            MON + 23 * 3600 + 1800,
            Some(MON + 86_400 + 1800),
            true,
            Some(7),
            None,
        )];
        let q = query("2024-04-22", "2024-04-23");
        let report = minutes_report(&sessions, &q, MON + 2 * 86_400);

        assert_eq!(report.dates.len(), 2);
        assert_eq!(report.series.len(), 1);
        let s = &report.series[0];
        assert_eq!(s.data, vec![30.0, 30.0]);
        assert_eq!(s.total_minutes, 60.0);
        assert_eq!(s.label, "Host - None");
        assert_eq!(report.total_minutes, 60.0);
    }

    #[test]
    fn day_split_conserves_total() {
        // 3 days straight.
        let sessions = [session(
            1,
            MON + 600,
            Some(MON + 2 * 86_400 + 600),
            false,
            Some(1),
            None,
        )];
        let q = query("2024-04-22", "2024-04-25");
        let report = minutes_report(&sessions, &q, MON + 10 * 86_400);
        let sum: f64 = report.series[0].data.iter().sum();
        assert!((sum - 2880.0).abs() < 0.01);
    }

    #[test]
    fn range_clamps_out_of_window_portion() {
        // Session spans Mon..Wed but query covers only Tue.
        let sessions = [session(
            1,
            MON,
            Some(MON + 3 * 86_400),
            true,
            Some(7),
            None,
        )];
        let q = query("2024-04-23", "2024-04-23");
        let report = minutes_report(&sessions, &q, MON + 10 * 86_400);
        assert_eq!(report.series[0].data, vec![1440.0]);
    }

    #[test]
    fn incomplete_session_counts_up_to_now() {
        let sessions = [session(1, MON + 600, None, true, Some(7), None)];
        let q = query("2024-04-22", "2024-04-22");
        // Now is 10 minutes after join.
        let report = minutes_report(&sessions, &q, MON + 1200);
        assert_eq!(report.series[0].data, vec![10.0]);
    }

    #[test]
    fn axis_is_gap_free_and_zero_filled() {
        let sessions = [session(1, MON, Some(MON + 60), true, Some(7), None)];
        let q = query("2024-04-22", "2024-04-26");
        let report = minutes_report(&sessions, &q, MON + 10 * 86_400);
        assert_eq!(report.dates.len(), 5);
        assert_eq!(report.series[0].data, vec![1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn zero_total_series_dropped() {
        let sessions = [
            session(1, MON, Some(MON + 60), true, Some(7), None),
            // Outside the query range entirely.
            session(2, MON - 10 * 86_400, Some(MON - 10 * 86_400 + 60), false, Some(1), None),
        ];
        let q = query("2024-04-22", "2024-04-22");
        let report = minutes_report(&sessions, &q, MON + 86_400);
        assert_eq!(report.series.len(), 1);
        assert!(matches!(
            report.series[0].key,
            SeriesKey::Role {
                role: Role::Host,
                ..
            }
        ));
    }

    #[test]
    fn null_client_type_only_counts_on_linux() {
        let sessions = [
            // Linux with NULL client type.
            session(1, MON, Some(MON + 120), true, Some(6), None),
            // Web with NULL client type: excluded by a NULL-client filter.
            session(2, MON, Some(MON + 120), true, Some(7), None),
        ];
        let mut q = query("2024-04-22", "2024-04-22");
        q.client_types = vec![None];
        let report = minutes_report(&sessions, &q, MON + 86_400);
        assert_eq!(report.series.len(), 1);
        assert_eq!(report.total_minutes, 2.0);
    }

    #[test]
    fn platform_breakdown_groups_by_platform_and_client_type() {
        let sessions = [
            session(1, MON, Some(MON + 60), true, Some(6), Some(10)),
            session(2, MON, Some(MON + 60), false, Some(6), Some(10)),
            session(3, MON, Some(MON + 60), false, Some(7), None),
        ];
        let mut q = query("2024-04-22", "2024-04-22");
        q.breakdown_by = BreakdownBy::Platform;
        let report = minutes_report(&sessions, &q, MON + 86_400);
        assert_eq!(report.series.len(), 2);
        let labels: Vec<&str> = report.series.iter().map(|s| s.label.as_str()).collect();
        assert!(labels.contains(&"Linux - Cloud recording"));
        assert!(labels.contains(&"Web - None"));
    }

    #[test]
    fn role_filter_restricts_sessions() {
        let sessions = [
            session(1, MON, Some(MON + 60), true, Some(7), None),
            session(2, MON, Some(MON + 120), false, Some(7), None),
        ];
        let mut q = query("2024-04-22", "2024-04-22");
        q.roles = vec![Role::Audience];
        let report = minutes_report(&sessions, &q, MON + 86_400);
        assert_eq!(report.series.len(), 1);
        assert_eq!(report.total_minutes, 2.0);
    }

    #[test]
    fn month_period_normalizes_and_buckets() {
        let sessions = [
            session(1, MON, Some(MON + 3600), true, Some(7), None),
            // 2024-05-03, one hour.
            session(2, 1_714_694_400, Some(1_714_698_000), true, Some(7), None),
        ];
        let mut q = query("2024-04-10", "2024-05-20");
        q.period = Period::Month;
        let report = minutes_report(&sessions, &q, 1_715_000_000);
        assert_eq!(report.dates.len(), 2);
        assert_eq!(report.dates[0].key, "2024-04");
        assert_eq!(report.dates[1].key, "2024-05");
        assert_eq!(report.series[0].data, vec![60.0, 60.0]);
    }
}
