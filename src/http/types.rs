//! Request and response bodies for the read API.

use crate::analytics::{BreakdownBy, Period};
use crate::db::SessionRow;
use serde::{Deserialize, Serialize};

/// One session as serialized by the read API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: i64,
    pub uid: i64,
    pub channel_name: String,
    pub channel_session_id: String,
    pub join_ts: i64,
    pub leave_ts: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub duration_minutes: Option<f64>,
    pub product_id: Option<i64>,
    pub platform: Option<i64>,
    pub platform_name: String,
    pub reason: Option<i64>,
    pub client_type: Option<i64>,
    pub communication_mode: i64,
    pub is_host: bool,
    pub role_switches: i64,
    pub account: Option<String>,
    pub sid: Option<String>,
}

impl From<&SessionRow> for SessionResponse {
    fn from(row: &SessionRow) -> Self {
        Self {
            id: row.id,
            uid: row.uid,
            channel_name: row.channel_name.clone(),
            channel_session_id: row.channel_session_id.clone(),
            join_ts: row.join_ts,
            leave_ts: row.leave_ts,
            duration_seconds: row.duration_seconds,
            duration_minutes: row.duration_seconds.map(|d| d as f64 / 60.0),
            product_id: row.product_id,
            platform: row.platform,
            platform_name: callscope_proto::platform_display(row.platform, row.client_type),
            reason: row.reason,
            client_type: row.client_type,
            communication_mode: row.communication_mode,
            is_host: row.is_host,
            role_switches: row.role_switches,
            account: row.account.clone(),
            sid: row.sid.clone(),
        }
    }
}

/// Pagination envelope for the epoch list.
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// One entry of the epoch list.
#[derive(Debug, Clone, Serialize)]
pub struct EpochListEntry {
    pub channel_name: String,
    pub channel_session_id: String,
    pub total_minutes: f64,
    pub unique_users: i64,
    pub first_activity_ts: Option<i64>,
    pub last_activity_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_types: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpochListResponse {
    pub channels: Vec<EpochListEntry>,
    pub pagination: Pagination,
}

/// Channel (epoch) detail.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelDetailResponse {
    pub channel_name: String,
    pub channel_session_id: String,
    pub total_minutes: f64,
    pub unique_users: usize,
    pub host_minutes: f64,
    pub audience_minutes: f64,
    pub unique_hosts: usize,
    pub unique_audiences: usize,
    pub wall_clock_minutes: Option<f64>,
    pub user_minutes: f64,
    pub utilization: Option<f64>,
    pub sessions: Vec<SessionResponse>,
}

/// Channel quality metrics.
#[derive(Debug, Clone, Serialize)]
pub struct QualityResponse {
    pub channel_name: String,
    pub channel_session_id: String,
    pub avg_session_minutes: f64,
    pub max_concurrent_users: i64,
    pub peak_concurrent_ts: Option<i64>,
    pub concurrency_curve: Vec<(i64, i64)>,
    pub session_length_histogram: Vec<HistogramBucket>,
    pub reason_breakdown: ReasonBreakdownResponse,
    pub failed_calls: usize,
    pub abnormal_leaves: usize,
    pub single_user_channel: bool,
    pub quality_score: f64,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBucket {
    pub bucket: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasonBreakdownResponse {
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

impl From<crate::analytics::ReasonBreakdown> for ReasonBreakdownResponse {
    fn from(b: crate::analytics::ReasonBreakdown) -> Self {
        Self {
            normal_exits: b.normal_exits,
            connection_timeouts: b.connection_timeouts,
            permission_issues: b.permission_issues,
            server_issues: b.server_issues,
            device_switches: b.device_switches,
            ip_switching: b.ip_switching,
            network_failures: b.network_failures,
            abnormal_leaves: b.abnormal_leaves,
            other_issues: b.other_issues,
        }
    }
}

/// Per-user analytics inside one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelUserEntry {
    pub uid: i64,
    pub total_minutes: f64,
    pub session_count: usize,
    pub role_switches: i64,
    pub platform_distribution: std::collections::BTreeMap<String, usize>,
    pub failed_calls: usize,
    pub abnormal_leaves: usize,
    pub quality_score: f64,
    pub reason_breakdown: ReasonBreakdownResponse,
    pub reconnection: ReconnectionResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconnectionResponse {
    pub reconnection_count: usize,
    pub burst_sessions: usize,
    pub rapid_reconnections: usize,
    pub avg_gap_minutes: f64,
    pub pattern: &'static str,
}

impl From<&crate::analytics::ReconnectAnalysis> for ReconnectionResponse {
    fn from(a: &crate::analytics::ReconnectAnalysis) -> Self {
        Self {
            reconnection_count: a.reconnection_count,
            burst_sessions: a.burst_sessions,
            rapid_reconnections: a.rapid_reconnections,
            avg_gap_minutes: (a.avg_gap_minutes * 100.0).round() / 100.0,
            pattern: a.pattern.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelUsersResponse {
    pub channel_name: String,
    pub channel_session_id: String,
    pub total_users: usize,
    pub users: Vec<ChannelUserEntry>,
}

/// Per-channel stats inside the user detail view.
#[derive(Debug, Clone, Serialize)]
pub struct UserChannelEntry {
    pub channel_name: String,
    pub total_minutes: f64,
    pub session_count: usize,
    pub role_switches: i64,
    pub was_host: bool,
    pub communication_mode: i64,
    pub last_activity_ts: i64,
}

/// User detail.
#[derive(Debug, Clone, Serialize)]
pub struct UserDetailResponse {
    pub uid: i64,
    pub app_id: String,
    pub total_channels_joined: usize,
    pub total_active_minutes: f64,
    pub total_role_switches: i64,
    pub platform_distribution: std::collections::BTreeMap<String, usize>,
    pub avg_session_minutes: f64,
    pub spike_detection_score: f64,
    pub abnormal_leaves: usize,
    pub failed_calls: usize,
    pub product_breakdown: std::collections::BTreeMap<String, f64>,
    pub reason_breakdown: ReasonBreakdownResponse,
    pub channels: Vec<UserChannelEntry>,
    pub quality_insights: Vec<String>,
    pub sid: Option<String>,
}

/// Minutes analytics request body.
#[derive(Debug, Clone, Deserialize)]
pub struct MinutesRequest {
    /// YYYY-MM-DD; defaults to 30 days before `end_date`.
    #[serde(default)]
    pub start_date: Option<String>,
    /// YYYY-MM-DD; defaults to today.
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub period: Period,
    #[serde(default)]
    pub platforms: Vec<i64>,
    /// May contain nulls to select the NULL client type.
    #[serde(default)]
    pub client_types: Vec<Option<i64>>,
    /// "host" / "audience".
    #[serde(default)]
    pub role: Vec<String>,
    #[serde(default)]
    pub breakdown_by: BreakdownBy,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinutesSeriesResponse {
    pub label: String,
    pub data: Vec<f64>,
    pub total_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_name: Option<String>,
    pub client_type: Option<i64>,
    pub client_type_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinutesDataPoint {
    pub date: String,
    pub display_date: String,
    pub minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinutesResponse {
    pub app_id: String,
    pub start_date: String,
    pub end_date: String,
    pub period: &'static str,
    pub total_minutes: f64,
    pub data_points: Vec<MinutesDataPoint>,
    pub series: Vec<MinutesSeriesResponse>,
}

/// Observed platform entry for the filter pickers.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedPlatform {
    pub id: i64,
    pub name: String,
}

/// Observed client-type entry; `id` is null for the NULL client type.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedClientType {
    pub id: Option<i64>,
    pub name: String,
}
