//! Integration tests for the reconciliation engine: epochs, sessions,
//! dedup, out-of-order repair and provisional merging.

mod common;

use callscope::engine::EpochId;
use callscope::error::IngestOutcome;
use common::{Notify, TestEngine};

const APP: &str = "appA";
const CH: &str = "standup";

#[tokio::test]
async fn clean_call_produces_one_closed_session() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 100).build()).await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 101).user(1, 1).build())
        .await;
    t.ingest(
        APP,
        &Notify::new("n3", 104, CH, 161)
            .user(1, 2)
            .duration(60)
            .reason(1)
            .build(),
    )
    .await;
    t.ingest(APP, &Notify::new("n4", 102, CH, 170).build()).await;

    let epoch = format!("{APP}_{CH}_100");
    let sessions = t
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &epoch, 1000)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.join_ts, 101);
    assert_eq!(session.leave_ts, Some(161));
    assert_eq!(session.duration_seconds, Some(60));
    assert!(session.is_host);
    assert_eq!(session.role_switches, 0);

    // Epoch closed on 102.
    assert_eq!(t.engine.active_epoch(APP, CH), None);
}

#[tokio::test]
async fn role_switch_mid_session_is_recorded() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 0).build()).await;
    t.ingest(APP, &Notify::new("n2", 105, CH, 10).user(7, 1).build())
        .await;
    t.ingest(APP, &Notify::new("n3", 111, CH, 40).user(7, 2).build())
        .await;
    t.ingest(
        APP,
        &Notify::new("n4", 106, CH, 70).user(7, 3).duration(60).build(),
    )
    .await;
    t.ingest(APP, &Notify::new("n5", 102, CH, 80).build()).await;

    let epoch = format!("{APP}_{CH}_0");
    let sessions = t
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &epoch, 1000)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].role_switches, 1);
    assert!(sessions[0].is_host);

    let role_events = t
        .engine
        .db()
        .sessions()
        .role_events_for_epoch(&epoch)
        .await
        .unwrap();
    assert_eq!(role_events.len(), 1);
    assert_eq!(role_events[0].new_role, "host");
    assert_eq!(role_events[0].ts, 40);
}

#[tokio::test]
async fn leave_before_join_reconstructs_the_interval() {
    let t = TestEngine::new().await;

    t.ingest(
        APP,
        &Notify::new("n1", 104, CH, 200).user(3, 2).duration(30).build(),
    )
    .await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 170).user(3, 1).build())
        .await;

    let sessions = t.engine.db().sessions().list_for_user(APP, 3).await.unwrap();
    let closed: Vec<_> = sessions.iter().filter(|s| s.leave_ts.is_some()).collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].join_ts, 170);
    assert_eq!(closed[0].leave_ts, Some(200));
    assert_eq!(closed[0].duration_seconds, Some(30));
}

#[tokio::test]
async fn orphan_events_merge_into_late_create() {
    let t = TestEngine::new().await;

    // User event with no prior create: provisional epoch.
    t.ingest(APP, &Notify::new("n1", 105, CH, 500).user(9, 1).build())
        .await;
    assert_eq!(
        t.engine.active_epoch(APP, CH),
        Some(EpochId::Provisional { ts: 500 })
    );
    let provisional = t
        .engine
        .db()
        .sessions()
        .count_provisional(APP, CH)
        .await
        .unwrap();
    assert_eq!(provisional, 1);

    // The create arrives late, stamped before the orphan event.
    t.ingest(APP, &Notify::new("n2", 101, CH, 490).build()).await;

    assert_eq!(
        t.engine.db().sessions().count_provisional(APP, CH).await.unwrap(),
        0
    );
    let epoch = format!("{APP}_{CH}_490");
    let sessions = t
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &epoch, 1000)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].uid, 9);
    assert_eq!(
        t.engine.active_epoch(APP, CH),
        Some(EpochId::Confirmed { ts: 490 })
    );
}

#[tokio::test]
async fn duplicate_notice_id_is_dropped() {
    let t = TestEngine::new().await;

    let join = Notify::new("n-dup", 103, CH, 101).user(1, 1).build();
    let first = t.ingest(APP, &join).await;
    assert_eq!(first, IngestOutcome::Accepted);
    assert_eq!(t.engine.dedup_memo_len(), 1);

    let second = t.ingest(APP, &join).await;
    assert_eq!(second, IngestOutcome::Duplicate);
    assert_eq!(t.engine.dedup_memo_len(), 1);

    let sessions = t.engine.db().sessions().list_for_user(APP, 1).await.unwrap();
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn duplicate_survives_memo_eviction_via_store() {
    // Memo of size 2: the duplicate of n1 arrives after n1 was evicted, so
    // only the store lookup can catch it.
    let config = callscope::config::IngestConfig {
        dedup_cache_size: 2,
        ..Default::default()
    };
    let t = TestEngine::with_config(config).await;

    t.ingest(APP, &Notify::new("n1", 103, CH, 10).user(1, 1).build())
        .await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 11).user(2, 1).build())
        .await;
    t.ingest(APP, &Notify::new("n3", 103, CH, 12).user(3, 1).build())
        .await;

    let replay = t
        .ingest(APP, &Notify::new("n1", 103, CH, 10).user(1, 1).build())
        .await;
    assert_eq!(replay, IngestOutcome::Duplicate);
}

#[tokio::test]
async fn stale_client_seq_join_is_ignored() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 0).build()).await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 100).user(1, 5).build())
        .await;
    // Replayed older join with a lower seq and a different ts.
    t.ingest(APP, &Notify::new("n3", 103, CH, 90).user(1, 4).build())
        .await;

    let sessions = t.engine.db().sessions().list_for_user(APP, 1).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].join_ts, 100);
    assert_eq!(sessions[0].last_client_seq, Some(5));
}

#[tokio::test]
async fn early_join_rewinds_open_session() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 0).build()).await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 100).user(1, 1).build())
        .await;
    // Newer seq, earlier ts: the session's join rewinds.
    t.ingest(APP, &Notify::new("n3", 103, CH, 60).user(1, 2).build())
        .await;

    let sessions = t.engine.db().sessions().list_for_user(APP, 1).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].join_ts, 60);
    assert_eq!(sessions[0].last_client_seq, Some(2));
}

#[tokio::test]
async fn leave_without_session_or_duration_is_dropped() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 0).build()).await;
    let outcome = t
        .ingest(APP, &Notify::new("n2", 104, CH, 50).user(1, 1).build())
        .await;
    // Raw row accepted, no session written.
    assert_eq!(outcome, IngestOutcome::Accepted);
    let sessions = t.engine.db().sessions().list_for_user(APP, 1).await.unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn user_event_without_client_seq_persists_raw_only() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 0).build()).await;
    let mut join = Notify::new("n2", 103, CH, 10).build();
    join.payload.uid = Some(4);
    // clientSeq deliberately missing.
    let outcome = t.ingest(APP, &join).await;
    assert_eq!(outcome, IngestOutcome::AcceptedRawOnly);

    let sessions = t.engine.db().sessions().list_for_user(APP, 4).await.unwrap();
    assert!(sessions.is_empty());
    assert!(t.engine.db().events().notice_exists("n2").await.unwrap());
}

#[tokio::test]
async fn unknown_event_type_persists_raw_only() {
    let t = TestEngine::new().await;
    let outcome = t
        .ingest(APP, &Notify::new("n1", 150, CH, 10).user(1, 1).build())
        .await;
    assert_eq!(outcome, IngestOutcome::AcceptedRawOnly);
    assert!(t.engine.db().events().notice_exists("n1").await.unwrap());
}

#[tokio::test]
async fn reconnection_heartbeat_refreshes_join() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 0).build()).await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 100).user(1, 1).build())
        .await;
    t.ingest(APP, &Notify::new("n3", 103, CH, 150).user(1, 2).build())
        .await;

    let sessions = t.engine.db().sessions().list_for_user(APP, 1).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].join_ts, 150);
}

#[tokio::test]
async fn role_change_before_join_is_applied_at_join() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 0).build()).await;
    // Role switch arrives before the join notification.
    t.ingest(APP, &Notify::new("n2", 111, CH, 40).user(7, 2).build())
        .await;
    t.ingest(APP, &Notify::new("n3", 105, CH, 10).user(7, 1).build())
        .await;

    let sessions = t.engine.db().sessions().list_for_user(APP, 7).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_host);
    assert_eq!(sessions[0].role_switches, 1);
    // Communication mode set at creation, untouched by the switch.
    assert_eq!(sessions[0].communication_mode, 0);
}

#[tokio::test]
async fn late_leave_after_destroy_labels_closed_epoch() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 100).build()).await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 110).user(1, 1).build())
        .await;
    t.ingest(APP, &Notify::new("n3", 102, CH, 200).build()).await;

    // Leave arrives after the destroy; it must land in the closed epoch
    // without resurrecting it.
    t.ingest(
        APP,
        &Notify::new("n4", 104, CH, 250).user(1, 2).duration(140).build(),
    )
    .await;

    let epoch = format!("{APP}_{CH}_100");
    let sessions = t
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &epoch, 1000)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].leave_ts, Some(250));
    assert_eq!(t.engine.active_epoch(APP, CH), None);
}

#[tokio::test]
async fn second_epoch_on_same_channel_is_distinct() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("n1", 101, CH, 100).build()).await;
    t.ingest(APP, &Notify::new("n2", 103, CH, 110).user(1, 1).build())
        .await;
    t.ingest(
        APP,
        &Notify::new("n3", 104, CH, 160).user(1, 2).duration(50).build(),
    )
    .await;
    t.ingest(APP, &Notify::new("n4", 102, CH, 170).build()).await;

    t.ingest(APP, &Notify::new("n5", 101, CH, 300).build()).await;
    t.ingest(APP, &Notify::new("n6", 103, CH, 310).user(1, 3).build())
        .await;

    let first = t
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &format!("{APP}_{CH}_100"), 1000)
        .await
        .unwrap();
    let second = t
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &format!("{APP}_{CH}_300"), 1000)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(second[0].leave_ts.is_none());
}

#[tokio::test]
async fn stranded_provisional_rows_go_to_previous_epoch() {
    let t = TestEngine::new().await;

    // First epoch lives and dies.
    t.ingest(APP, &Notify::new("n1", 101, CH, 100).build()).await;
    t.ingest(APP, &Notify::new("n2", 102, CH, 200).build()).await;

    // An orphan join lands between the destroy and the next create.
    t.ingest(APP, &Notify::new("n3", 105, CH, 210).user(5, 1).build())
        .await;
    assert_eq!(
        t.engine.db().sessions().count_provisional(APP, CH).await.unwrap(),
        1
    );

    // Next create at 250: the stranded row belongs to the previous epoch.
    t.ingest(APP, &Notify::new("n4", 101, CH, 250).build()).await;

    assert_eq!(
        t.engine.db().sessions().count_provisional(APP, CH).await.unwrap(),
        0
    );
    let previous = t
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &format!("{APP}_{CH}_100"), 1000)
        .await
        .unwrap();
    assert_eq!(previous.len(), 1);
    assert_eq!(previous[0].uid, 5);
}

#[tokio::test]
async fn aggregates_recompute_idempotently() {
    let t = TestEngine::new().await;

    // 2024-04-22 12:00 UTC.
    let base = 1_713_787_200;
    t.ingest(APP, &Notify::new("n1", 101, CH, base).build()).await;
    t.ingest(APP, &Notify::new("n2", 103, CH, base + 10).user(1, 1).build())
        .await;
    t.ingest(
        APP,
        &Notify::new("n3", 104, CH, base + 130)
            .user(1, 2)
            .duration(120)
            .build(),
    )
    .await;
    // Duplicate of the leave must not change totals.
    t.ingest(
        APP,
        &Notify::new("n3", 104, CH, base + 130)
            .user(1, 2)
            .duration(120)
            .build(),
    )
    .await;

    let epoch = format!("{APP}_{CH}_{base}");
    let day = t
        .engine
        .db()
        .aggregates()
        .channel_day(APP, CH, &epoch, "2024-04-22")
        .await
        .unwrap()
        .expect("channel day row");
    assert_eq!(day.total_users, 1);
    assert_eq!(day.unique_users, 1);
    assert!((day.total_minutes - 2.0).abs() < 1e-9);
    assert_eq!(day.first_activity_ts, Some(base));
    assert_eq!(day.last_activity_ts, Some(base + 130));

    let user_day = t
        .engine
        .db()
        .aggregates()
        .user_day(APP, 1, CH, "2024-04-22")
        .await
        .unwrap()
        .expect("user day row");
    assert_eq!(user_day.session_count, 1);
    assert!((user_day.total_minutes - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn duplicate_heavy_stream_matches_clean_stream() {
    // Dedup idempotence: replaying a subset of notifications leaves the
    // final session state identical to the clean run.
    let clean = TestEngine::new().await;
    let noisy = TestEngine::new().await;

    let stream = vec![
        Notify::new("m1", 101, CH, 0).build(),
        Notify::new("m2", 105, CH, 10).user(7, 1).build(),
        Notify::new("m3", 111, CH, 40).user(7, 2).build(),
        Notify::new("m4", 106, CH, 70).user(7, 3).duration(60).reason(1).build(),
        Notify::new("m5", 102, CH, 80).build(),
    ];

    for n in &stream {
        clean.ingest(APP, n).await;
    }
    for n in &stream {
        noisy.ingest(APP, n).await;
        // Immediate replay of every notification.
        noisy.ingest(APP, n).await;
    }

    let epoch = format!("{APP}_{CH}_0");
    let clean_rows = clean
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &epoch, 1000)
        .await
        .unwrap();
    let noisy_rows = noisy
        .engine
        .db()
        .sessions()
        .list_for_epoch(APP, CH, &epoch, 1000)
        .await
        .unwrap();

    assert_eq!(clean_rows.len(), noisy_rows.len());
    for (a, b) in clean_rows.iter().zip(noisy_rows.iter()) {
        assert_eq!(a.join_ts, b.join_ts);
        assert_eq!(a.leave_ts, b.leave_ts);
        assert_eq!(a.duration_seconds, b.duration_seconds);
        assert_eq!(a.is_host, b.is_host);
        assert_eq!(a.role_switches, b.role_switches);
    }
}

#[tokio::test]
async fn shuffled_stream_converges_on_same_minutes() {
    // Out-of-order tolerance: permutations preserving each notification's
    // own ts produce the same aggregate minutes.
    let orders: Vec<Vec<usize>> = vec![
        vec![0, 1, 2, 3, 4],
        vec![1, 0, 2, 4, 3],
        vec![4, 3, 2, 1, 0],
        vec![2, 4, 0, 1, 3],
    ];

    let mut totals = Vec::new();
    for order in orders {
        let t = TestEngine::new().await;
        let stream = vec![
            Notify::new("p1", 101, CH, 0).build(),
            Notify::new("p2", 105, CH, 10).user(7, 1).build(),
            Notify::new("p3", 111, CH, 40).user(7, 2).build(),
            Notify::new("p4", 106, CH, 70).user(7, 3).duration(60).build(),
            Notify::new("p5", 102, CH, 80).build(),
        ];
        for &i in &order {
            t.ingest(APP, &stream[i]).await;
        }

        let epoch = format!("{APP}_{CH}_0");
        let rows = t
            .engine
            .db()
            .sessions()
            .list_for_epoch(APP, CH, &epoch, 1000)
            .await
            .unwrap();
        let minutes: i64 = rows.iter().filter_map(|r| r.duration_seconds).sum();
        totals.push(minutes);
        // No provisional rows may survive once the create has arrived.
        assert_eq!(
            t.engine.db().sessions().count_provisional(APP, CH).await.unwrap(),
            0
        );
    }

    assert!(totals.iter().all(|&m| m == totals[0]));
    assert_eq!(totals[0], 60);
}

#[tokio::test]
async fn channels_are_independent() {
    let t = TestEngine::new().await;

    t.ingest(APP, &Notify::new("c1", 101, "alpha", 100).build()).await;
    t.ingest(APP, &Notify::new("c2", 101, "beta", 100).build()).await;
    t.ingest(APP, &Notify::new("c3", 102, "alpha", 200).build()).await;

    assert_eq!(t.engine.active_epoch(APP, "alpha"), None);
    assert_eq!(
        t.engine.active_epoch(APP, "beta"),
        Some(EpochId::Confirmed { ts: 100 })
    );
}
