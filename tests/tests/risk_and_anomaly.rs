//! Risk scoring and anomaly detection through the full stack.

use guard_core::{
    Alert, AnomalyKind, AuditEventKind, FirstSessionHourRule, GeoLocation, RiskConfig, RiskLevel,
    SessionSignals,
};
use integration_tests::{
    fixtures,
    setup::{start_time, TestContext},
};
use worker::AnomalyConfig;

/// Six concurrent sessions for one user: the three beyond the allowance
/// carry +10 x 3 and score at least medium.
#[tokio::test]
async fn test_concurrency_beyond_allowance_scores_medium() {
    let ctx = TestContext::new();
    let mut ids = Vec::new();
    for i in 0..6 {
        ctx.advance_secs(1);
        ids.push(
            ctx.login(fixtures::user("carol"), &format!("10.0.1.{}", i))
                .await,
        );
    }

    let history = ctx.registry.sessions_for_user("carol");
    for (rank, id) in ids.iter().enumerate() {
        let session = ctx.registry.get(id).unwrap();
        let assessment = ctx.scorer.assess(&session, &history);
        if rank < 3 {
            assert_eq!(assessment.score, 0, "session {} should be within allowance", rank);
            assert_eq!(assessment.level, RiskLevel::Low);
        } else {
            assert_eq!(assessment.score, 30);
            assert!(assessment.level >= RiskLevel::Medium);
        }
    }

    // The sixth session already saw five others when it was created
    assert_eq!(ctx.registry.get(&ids[5]).unwrap().risk, RiskLevel::Medium);
}

/// Six sessions from one origin inside the window, threshold 5: exactly
/// one signal listing all six; a second tick inside the cool-down is quiet.
#[tokio::test]
async fn test_origin_fan_out_signals_once() {
    let ctx = TestContext::new();
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            ctx.login(fixtures::user(&format!("member-{}", i)), "203.0.113.7")
                .await,
        );
    }
    ids.sort();

    let report = ctx.tick().await;
    assert_eq!(report.anomalies, 1);

    let signals: Vec<_> = ctx
        .alerts
        .captured()
        .into_iter()
        .filter_map(|a| match a {
            Alert::Anomaly { signal } => Some(signal),
            _ => None,
        })
        .collect();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].kind, AnomalyKind::MultiSessionOrigin);
    assert_eq!(signals[0].severity, RiskLevel::Medium);
    assert_eq!(signals[0].session_ids, ids);
    assert_eq!(signals[0].user_ids.len(), 6);

    ctx.advance_minutes(10);
    assert_eq!(ctx.tick().await.anomalies, 0);
    assert_eq!(ctx.alerts.count("multi-session-origin"), 1);
}

#[tokio::test]
async fn test_origin_threshold_is_configurable() {
    let ctx = TestContext::build(
        fixtures::standard_table(),
        RiskConfig::default(),
        AnomalyConfig {
            origin_threshold: 2,
            ..AnomalyConfig::default()
        },
    );
    for i in 0..3 {
        ctx.login(fixtures::user(&format!("member-{}", i)), "198.51.100.1")
            .await;
    }

    assert_eq!(ctx.tick().await.anomalies, 1);
}

#[tokio::test]
async fn test_fan_out_rescores_affected_sessions() {
    let ctx = TestContext::new();
    let mut ids = Vec::new();
    for _ in 0..6 {
        ctx.advance_secs(1);
        ids.push(ctx.login(fixtures::user("dave"), "203.0.113.9").await);
    }

    // The fourth session was created with only one session over the allowance
    assert_eq!(ctx.registry.get(&ids[3]).unwrap().risk, RiskLevel::Low);

    let report = ctx.tick().await;
    assert_eq!(report.anomalies, 1);
    assert!(report.risk_escalations >= 1);

    for id in &ids[..3] {
        assert_eq!(ctx.registry.get(id).unwrap().risk, RiskLevel::Low);
    }
    for id in &ids[3..] {
        assert_eq!(ctx.registry.get(id).unwrap().risk, RiskLevel::Medium);
    }
    assert!(ctx.audit_count(AuditEventKind::RiskChanged) >= 1);
}

#[tokio::test]
async fn test_critical_session_sweep() {
    let ctx = TestContext::new();
    let id = ctx.login(fixtures::user("erin"), "10.0.0.5").await;
    ctx.registry
        .set_risk(&id, RiskLevel::Critical, false)
        .unwrap();

    assert_eq!(ctx.tick().await.anomalies, 1);
    let alerts = ctx.alerts.captured();
    match &alerts[0] {
        Alert::Anomaly { signal } => {
            assert_eq!(signal.kind, AnomalyKind::RiskSession);
            assert_eq!(signal.severity, RiskLevel::Critical);
            assert_eq!(signal.session_ids, vec![id.clone()]);
        }
        other => panic!("unexpected alert: {:?}", other),
    }

    ctx.advance_minutes(5);
    assert_eq!(ctx.tick().await.anomalies, 0);
}

#[tokio::test]
async fn test_new_country_and_device_score_high() {
    let ctx = TestContext::new();
    ctx.api
        .create_session(fixtures::user("frank"), fixtures::signals_in("10.0.0.1", "EC"))
        .await
        .unwrap();

    ctx.advance_minutes(5);
    let id = ctx
        .api
        .create_session(
            fixtures::user("frank"),
            SessionSignals::new("10.0.0.2", fixtures::NEW_FINGERPRINT)
                .with_geo(GeoLocation::new("PE", Some("Lima"))),
        )
        .await
        .unwrap();

    assert_eq!(ctx.registry.get(&id).unwrap().risk, RiskLevel::High);

    let created = ctx
        .audit
        .captured()
        .into_iter()
        .filter(|e| e.kind == AuditEventKind::SessionCreated)
        .last()
        .unwrap();
    assert_eq!(created.details["score"], 50);
}

#[tokio::test]
async fn test_first_session_hour_rule() {
    let night = start_time() - chrono::Duration::hours(6);

    let lenient = TestContext::new();
    lenient.clock.set(night);
    let id = lenient.login(fixtures::user("gina"), "10.0.0.1").await;
    assert_eq!(lenient.registry.get(&id).unwrap().risk, RiskLevel::Low);

    let strict = TestContext::build(
        fixtures::standard_table(),
        RiskConfig {
            first_session_hours: FirstSessionHourRule::OutsideWindow {
                start_hour: 7,
                end_hour: 19,
            },
            ..RiskConfig::default()
        },
        AnomalyConfig::default(),
    );
    strict.clock.set(night);
    let id = strict.login(fixtures::user("gina"), "10.0.0.1").await;
    assert_eq!(strict.registry.get(&id).unwrap().risk, RiskLevel::Medium);
}

#[tokio::test]
async fn test_odd_hour_against_history() {
    let ctx = TestContext::new();
    ctx.login(fixtures::user("hank"), "10.0.0.1").await;

    ctx.advance_minutes(20);
    let same_hour = ctx.login(fixtures::user("hank"), "10.0.0.1").await;
    assert_eq!(ctx.registry.get(&same_hour).unwrap().risk, RiskLevel::Low);

    ctx.advance_minutes(14 * 60);
    let late = ctx.login(fixtures::user("hank"), "10.0.0.1").await;
    assert_eq!(ctx.registry.get(&late).unwrap().risk, RiskLevel::Medium);
}

#[tokio::test]
async fn test_risk_never_drops_without_reset() {
    let ctx = TestContext::new();
    let id = ctx.login(fixtures::user("ivy"), "10.0.0.1").await;

    let proposals = [
        RiskLevel::Medium,
        RiskLevel::Low,
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Low,
    ];
    let mut previous = ctx.registry.get(&id).unwrap().risk;
    for level in proposals {
        ctx.registry.set_risk(&id, level, false).unwrap();
        let current = ctx.registry.get(&id).unwrap().risk;
        assert!(current >= previous);
        previous = current;
    }
    assert_eq!(previous, RiskLevel::High);

    let change = ctx.api.reset_risk(&id, RiskLevel::Low).await.unwrap();
    assert_eq!(change.previous, RiskLevel::High);
    assert_eq!(ctx.registry.get(&id).unwrap().risk, RiskLevel::Low);
    assert_eq!(ctx.audit_count(AuditEventKind::RiskChanged), 1);
}
