//! Read API handlers: epoch lists, channel/user analytics, minutes series,
//! mapping tables.

use super::types::*;
use super::{ApiError, AppState};
use crate::analytics::{
    self, MinutesQuery, analyze_reconnects, max_concurrency, quality_score, role_minutes,
    session_length_histogram,
};
use crate::db::SessionRow;
use axum::Json;
use axum::extract::{Path, Query, State};
use callscope_proto::{Role, client_type_name, platform_display, platform_name, product_name};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Deserialize)]
pub(super) struct PageQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_per_page")]
    per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    30
}

/// GET /api/apps/:app_id/channels
pub(super) async fn list_epochs(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<EpochListResponse>, ApiError> {
    let page_num = page.page.max(1);
    let per_page = page.per_page.clamp(1, 100);
    let sessions = state.engine.db().sessions();

    let total = sessions.count_epochs(&app_id).await?;
    let rows = sessions
        .list_epochs(&app_id, (page_num - 1) * per_page, per_page)
        .await?;

    let mut channels = Vec::with_capacity(rows.len());
    for row in rows {
        let client_types = sessions
            .epoch_client_types(&app_id, &row.channel_name, &row.channel_session_id)
            .await?;
        channels.push(EpochListEntry {
            channel_name: row.channel_name,
            channel_session_id: row.channel_session_id,
            total_minutes: round2(row.total_seconds.unwrap_or(0) as f64 / 60.0),
            unique_users: row.unique_users,
            first_activity_ts: row.first_join_ts,
            last_activity_ts: row.last_leave_ts,
            client_types: if client_types.is_empty() {
                None
            } else {
                Some(client_types)
            },
        });
    }

    let total_pages = (total + per_page - 1) / per_page;
    Ok(Json(EpochListResponse {
        channels,
        pagination: Pagination {
            page: page_num,
            per_page,
            total,
            total_pages,
            has_next: page_num < total_pages,
            has_prev: page_num > 1,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct EpochQuery {
    epoch: Option<String>,
}

/// Sessions for a channel, scoped to `epoch` when given, with the epoch
/// label actually used.
async fn channel_sessions(
    state: &AppState,
    app_id: &str,
    channel_name: &str,
    epoch: Option<String>,
) -> Result<(String, Vec<SessionRow>), ApiError> {
    let repo = state.engine.db().sessions();
    let cap = state.engine.config().session_response_cap as i64;

    let epoch = match epoch {
        Some(epoch) => epoch,
        None => repo
            .latest_epoch(app_id, channel_name)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("channel not found: {channel_name}")))?,
    };

    let rows = repo
        .list_for_epoch(app_id, channel_name, &epoch, cap)
        .await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no sessions for channel {channel_name} epoch {epoch}"
        )));
    }
    Ok((epoch, rows))
}

/// GET /api/apps/:app_id/channels/:channel_name
pub(super) async fn channel_detail(
    State(state): State<Arc<AppState>>,
    Path((app_id, channel_name)): Path<(String, String)>,
    Query(query): Query<EpochQuery>,
) -> Result<Json<ChannelDetailResponse>, ApiError> {
    let (epoch, sessions) = channel_sessions(&state, &app_id, &channel_name, query.epoch).await?;

    let role_events = state
        .engine
        .db()
        .sessions()
        .role_events_for_epoch(&epoch)
        .await?;
    let join_hints = state
        .engine
        .db()
        .events()
        .join_events_for_channel(&app_id, &channel_name)
        .await?;
    let tolerance = state.engine.config().initial_role_tolerance_secs;

    let split = role_minutes(&sessions, &role_events, &join_hints, tolerance);
    let total_minutes = analytics::user_minutes(&sessions);

    let unique_users: std::collections::HashSet<i64> = sessions.iter().map(|s| s.uid).collect();
    let unique_hosts: std::collections::HashSet<i64> = sessions
        .iter()
        .filter(|s| s.is_host)
        .map(|s| s.uid)
        .collect();
    let unique_audiences: std::collections::HashSet<i64> = sessions
        .iter()
        .filter(|s| !s.is_host)
        .map(|s| s.uid)
        .collect();

    Ok(Json(ChannelDetailResponse {
        channel_name,
        channel_session_id: epoch,
        total_minutes: round2(total_minutes),
        unique_users: unique_users.len(),
        host_minutes: round2(split.host_minutes),
        audience_minutes: round2(split.audience_minutes),
        unique_hosts: unique_hosts.len(),
        unique_audiences: unique_audiences.len(),
        wall_clock_minutes: analytics::wall_clock_minutes(&sessions).map(round2),
        user_minutes: round2(total_minutes),
        utilization: analytics::utilization(&sessions).map(|u| (u * 1000.0).round() / 1000.0),
        sessions: sessions.iter().map(SessionResponse::from).collect(),
    }))
}

/// GET /api/apps/:app_id/channels/:channel_name/quality
pub(super) async fn channel_quality(
    State(state): State<Arc<AppState>>,
    Path((app_id, channel_name)): Path<(String, String)>,
    Query(query): Query<EpochQuery>,
) -> Result<Json<QualityResponse>, ApiError> {
    let (epoch, sessions) = channel_sessions(&state, &app_id, &channel_name, query.epoch).await?;
    let weights = &state.config.quality;

    let concurrency = max_concurrency(&sessions);
    let breakdown = analytics::ReasonBreakdown::count(&sessions);
    let histogram = session_length_histogram(&sessions)
        .into_iter()
        .map(|(bucket, count)| HistogramBucket { bucket, count })
        .collect();

    Ok(Json(QualityResponse {
        channel_name,
        channel_session_id: epoch,
        avg_session_minutes: round2(analytics::quality::avg_session_minutes(&sessions)),
        max_concurrent_users: concurrency.max_concurrent,
        peak_concurrent_ts: concurrency.peak_ts,
        concurrency_curve: concurrency.curve,
        session_length_histogram: histogram,
        reason_breakdown: breakdown.into(),
        failed_calls: analytics::quality::failed_calls(&sessions),
        abnormal_leaves: breakdown.abnormal_leaves,
        single_user_channel: analytics::quality::single_user_epoch(&sessions),
        quality_score: round2(quality_score(&sessions, weights, None)),
        insights: analytics::quality::insights(&sessions, weights),
    }))
}

/// GET /api/apps/:app_id/channels/:channel_name/users
pub(super) async fn channel_users(
    State(state): State<Arc<AppState>>,
    Path((app_id, channel_name)): Path<(String, String)>,
    Query(query): Query<EpochQuery>,
) -> Result<Json<ChannelUsersResponse>, ApiError> {
    let (epoch, sessions) = channel_sessions(&state, &app_id, &channel_name, query.epoch).await?;
    let weights = &state.config.quality;

    let mut by_user: BTreeMap<i64, Vec<SessionRow>> = BTreeMap::new();
    for session in sessions {
        by_user.entry(session.uid).or_default().push(session);
    }

    let mut users = Vec::with_capacity(by_user.len());
    for (uid, user_sessions) in by_user {
        let reconnect = analyze_reconnects(&user_sessions);
        let total_minutes = analytics::user_minutes(&user_sessions);
        let breakdown = analytics::ReasonBreakdown::count(&user_sessions);

        let mut platform_distribution: BTreeMap<String, usize> = BTreeMap::new();
        for session in &user_sessions {
            if let Some(platform) = session.platform {
                *platform_distribution
                    .entry(platform_name(platform))
                    .or_insert(0) += 1;
            }
        }

        users.push(ChannelUserEntry {
            uid,
            total_minutes: round2(total_minutes),
            session_count: user_sessions.len(),
            role_switches: user_sessions.iter().map(|s| s.role_switches).sum(),
            platform_distribution,
            failed_calls: analytics::quality::failed_calls(&user_sessions),
            abnormal_leaves: breakdown.abnormal_leaves,
            quality_score: round2(quality_score(&user_sessions, weights, Some(&reconnect))),
            reason_breakdown: breakdown.into(),
            reconnection: (&reconnect).into(),
        });
    }
    users.sort_by(|a, b| {
        b.total_minutes
            .partial_cmp(&a.total_minutes)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(Json(ChannelUsersResponse {
        channel_name,
        channel_session_id: epoch,
        total_users: users.len(),
        users,
    }))
}

/// GET /api/apps/:app_id/users/:uid
pub(super) async fn user_detail(
    State(state): State<Arc<AppState>>,
    Path((app_id, uid)): Path<(String, i64)>,
) -> Result<Json<UserDetailResponse>, ApiError> {
    let sessions = state.engine.db().sessions().list_for_user(&app_id, uid).await?;
    if sessions.is_empty() {
        return Err(ApiError::NotFound(format!("user not found: {uid}")));
    }
    let weights = &state.config.quality;

    let total_minutes = analytics::user_minutes(&sessions);
    let breakdown = analytics::ReasonBreakdown::count(&sessions);
    let failed = analytics::quality::failed_calls(&sessions);

    let mut platform_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut product_breakdown: BTreeMap<String, f64> = BTreeMap::new();
    for session in &sessions {
        if let Some(platform) = session.platform {
            *platform_distribution
                .entry(platform_name(platform))
                .or_insert(0) += 1;
        }
        if let Some(product_id) = session.product_id {
            *product_breakdown.entry(product_name(product_id)).or_insert(0.0) +=
                session.duration_seconds.unwrap_or(0) as f64 / 60.0;
        }
    }
    for minutes in product_breakdown.values_mut() {
        *minutes = round2(*minutes);
    }

    // Per-channel stats: totals plus the communication mode of the most
    // recent session in each channel.
    let mut channels: BTreeMap<String, UserChannelEntry> = BTreeMap::new();
    for session in &sessions {
        let entry = channels
            .entry(session.channel_name.clone())
            .or_insert_with(|| UserChannelEntry {
                channel_name: session.channel_name.clone(),
                total_minutes: 0.0,
                session_count: 0,
                role_switches: 0,
                was_host: false,
                communication_mode: session.communication_mode,
                last_activity_ts: session.join_ts,
            });
        entry.total_minutes += session.duration_seconds.unwrap_or(0) as f64 / 60.0;
        entry.session_count += 1;
        entry.role_switches += session.role_switches;
        entry.was_host |= session.is_host;
        if session.join_ts > entry.last_activity_ts {
            entry.last_activity_ts = session.join_ts;
            entry.communication_mode = session.communication_mode;
        }
    }
    let channels: Vec<UserChannelEntry> = channels
        .into_values()
        .map(|mut entry| {
            entry.total_minutes = round2(entry.total_minutes);
            entry
        })
        .collect();

    let sid = sessions.iter().find_map(|s| s.sid.clone());

    Ok(Json(UserDetailResponse {
        uid,
        app_id,
        total_channels_joined: channels.len(),
        total_active_minutes: round2(total_minutes),
        total_role_switches: sessions.iter().map(|s| s.role_switches).sum(),
        platform_distribution,
        avg_session_minutes: round2(analytics::quality::avg_session_minutes(&sessions)),
        spike_detection_score: {
            let score = breakdown.abnormal_leaves as f64 / sessions.len() as f64;
            (score * 1000.0).round() / 1000.0
        },
        abnormal_leaves: breakdown.abnormal_leaves,
        failed_calls: failed,
        product_breakdown,
        reason_breakdown: breakdown.into(),
        channels,
        quality_insights: analytics::quality::insights(&sessions, weights),
        sid,
    }))
}

/// POST /api/apps/:app_id/minutes
pub(super) async fn minutes_analytics(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(request): Json<MinutesRequest>,
) -> Result<Json<MinutesResponse>, ApiError> {
    let today = Utc::now().date_naive();
    let end = parse_date(request.end_date.as_deref())?.unwrap_or(today);
    let start = parse_date(request.start_date.as_deref())?
        .unwrap_or_else(|| end - ChronoDuration::days(30));
    if start > end {
        return Err(ApiError::BadRequest("start_date is after end_date".into()));
    }

    let mut roles = Vec::new();
    for role in &request.role {
        match Role::from_str(role) {
            Some(role) => roles.push(role),
            None => {
                return Err(ApiError::BadRequest(format!("unknown role: {role}")));
            }
        }
    }

    let query = MinutesQuery {
        start,
        end,
        period: request.period,
        platforms: request.platforms,
        client_types: request.client_types,
        roles,
        breakdown_by: request.breakdown_by,
    };

    let (range_start_ts, range_end_ts) = query.range_ts();
    let sessions = state
        .engine
        .db()
        .sessions()
        .list_overlapping(&app_id, range_start_ts, range_end_ts)
        .await?;

    let now_ts = Utc::now().timestamp();
    let report = analytics::minutes::minutes_report(&sessions, &query, now_ts);

    let series = report
        .series
        .iter()
        .map(|s| {
            let (role, platform) = match s.key {
                analytics::minutes::SeriesKey::Role { role, .. } => (Some(role.as_str()), None),
                analytics::minutes::SeriesKey::Platform { platform, .. } => (None, platform),
            };
            MinutesSeriesResponse {
                label: s.label.clone(),
                data: s.data.clone(),
                total_minutes: s.total_minutes,
                role,
                platform,
                platform_name: platform.map(platform_name),
                client_type: s.key.client_type(),
                client_type_name: s.key.client_type().map(client_type_name),
            }
        })
        .collect();

    let data_points = report
        .dates
        .iter()
        .zip(&report.totals_per_date)
        .map(|(date, minutes)| MinutesDataPoint {
            date: date.key.clone(),
            display_date: date.display.clone(),
            minutes: *minutes,
        })
        .collect();

    Ok(Json(MinutesResponse {
        app_id,
        start_date: start.format("%Y-%m-%d").to_string(),
        end_date: end.format("%Y-%m-%d").to_string(),
        period: match request.period {
            analytics::Period::Day => "day",
            analytics::Period::Month => "month",
        },
        total_minutes: report.total_minutes,
        data_points,
        series,
    }))
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("invalid date: {raw}"))),
    }
}

/// GET /api/apps/:app_id/platforms
pub(super) async fn observed_platforms(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Result<Json<Vec<ObservedPlatform>>, ApiError> {
    let platforms = state
        .engine
        .db()
        .sessions()
        .distinct_platforms(&app_id)
        .await?;
    Ok(Json(
        platforms
            .into_iter()
            .map(|id| ObservedPlatform {
                id,
                name: platform_name(id),
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub(super) struct ClientTypeQuery {
    platform: Option<i64>,
}

/// GET /api/apps/:app_id/client-types
pub(super) async fn observed_client_types(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<ClientTypeQuery>,
) -> Result<Json<Vec<ObservedClientType>>, ApiError> {
    let client_types = state
        .engine
        .db()
        .sessions()
        .distinct_client_types(&app_id, query.platform)
        .await?;
    Ok(Json(
        client_types
            .into_iter()
            .map(|id| ObservedClientType {
                id,
                name: match id {
                    Some(id) => client_type_name(id),
                    None => "None".to_string(),
                },
            })
            .collect(),
    ))
}

/// GET /api/mappings/platforms
pub(super) async fn platform_mappings() -> Json<serde_json::Value> {
    let platform_ids = [0i64, 1, 2, 5, 6, 7, 8];
    let client_type_ids = [3i64, 8, 10];
    let product_ids = [1i64, 3, 4, 5];

    Json(json!({
        "platforms": platform_ids
            .iter()
            .map(|&id| (id.to_string(), platform_name(id)))
            .collect::<BTreeMap<_, _>>(),
        "client_types": client_type_ids
            .iter()
            .map(|&id| (id.to_string(), client_type_name(id)))
            .collect::<BTreeMap<_, _>>(),
        "products": product_ids
            .iter()
            .map(|&id| (id.to_string(), product_name(id)))
            .collect::<BTreeMap<_, _>>(),
        "combined_example": platform_display(Some(6), Some(10)),
    }))
}
