//! Timeout monitor scenarios: renewal, warning, expiry, and failure handling.

use guard_core::{Alert, AuditEventKind, Clock, SessionState};
use integration_tests::{fixtures, setup::TestContext};

fn state_of(ctx: &TestContext, id: &guard_core::SessionId) -> SessionState {
    ctx.registry.get(id).expect("session should exist").state
}

/// timeout=30m, warn_before=5m, grace=1m, no auto-renew:
/// idle 24m stays active, 26m warns, 31m expires.
#[tokio::test]
async fn test_warn_then_expire_without_auto_renew() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;

    ctx.advance_minutes(3);
    ctx.api.record_activity(&id).unwrap();
    ctx.api.record_activity(&id).unwrap();

    ctx.advance_minutes(24);
    let report = ctx.tick().await;
    assert_eq!(report.warned, 0);
    assert_eq!(state_of(&ctx, &id), SessionState::Active);

    ctx.advance_minutes(2);
    let report = ctx.tick().await;
    assert_eq!(report.warned, 1);
    assert_eq!(state_of(&ctx, &id), SessionState::Warned);
    assert_eq!(ctx.alerts.count("session_expiring"), 1);

    ctx.advance_minutes(5);
    let report = ctx.tick().await;
    assert_eq!(report.expired, 1);
    assert_eq!(state_of(&ctx, &id), SessionState::Expired);

    assert_eq!(
        ctx.audit.kinds(),
        vec![
            AuditEventKind::SessionCreated,
            AuditEventKind::SessionWarned,
            AuditEventKind::SessionExpired,
        ]
    );

    let expired = ctx
        .audit
        .captured()
        .into_iter()
        .find(|e| e.kind == AuditEventKind::SessionExpired)
        .unwrap();
    assert_eq!(expired.details["duration_secs"], 180);
    assert_eq!(expired.details["action_count"], 2);
    assert_eq!(expired.details["policy"], "office");

    // 30 minute policy is not a short-timeout policy
    assert_eq!(ctx.alerts.count("short_timeout_expiry"), 0);
}

/// Same policy with auto_renew and a 5 minute renew threshold: idle 26m
/// renews silently and the session stays active.
#[tokio::test]
async fn test_auto_renew_resets_idle_time() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(true)));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;

    ctx.advance_minutes(26);
    let report = ctx.tick().await;
    assert_eq!(report.renewed, 1);
    assert_eq!(report.warned, 0);

    let session = ctx.registry.get(&id).unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.last_activity, ctx.clock.now());
    assert_eq!(ctx.audit_count(AuditEventKind::SessionWarned), 0);
    assert!(ctx.alerts.captured().is_empty());
}

#[tokio::test]
async fn test_mobile_policy_renews_from_user_agent_class() {
    let ctx = TestContext::new();
    let id = ctx
        .api
        .create_session(fixtures::user("bob"), fixtures::mobile_signals("10.0.0.9"))
        .await
        .unwrap();

    ctx.advance_minutes(51);
    assert_eq!(ctx.tick().await.renewed, 1);
    assert_eq!(state_of(&ctx, &id), SessionState::Active);
}

#[tokio::test]
async fn test_repeated_ticks_emit_each_event_once() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    ctx.login(fixtures::user("alice"), "10.0.0.1").await;
    ctx.login(fixtures::user("bob"), "10.0.0.2").await;
    ctx.clear_captured();

    ctx.advance_minutes(26);
    let first = ctx.tick().await;
    let second = ctx.tick().await;

    assert_eq!(first.warned, 2);
    assert_eq!(second.warned, 0);
    assert_eq!(ctx.audit_count(AuditEventKind::SessionWarned), 2);
    assert_eq!(ctx.alerts.count("session_expiring"), 2);

    ctx.advance_minutes(5);
    let first = ctx.tick().await;
    let second = ctx.tick().await;

    assert_eq!(first.expired, 2);
    assert_eq!(second.expired, 0);
    assert_eq!(ctx.audit_count(AuditEventKind::SessionExpired), 2);
}

#[tokio::test]
async fn test_overlapping_ticks_mutate_once() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(
            ctx.login(fixtures::user(&format!("user-{}", i)), "10.0.0.1")
                .await,
        );
    }

    ctx.advance_minutes(26);
    let (a, b) = tokio::join!(ctx.tick(), ctx.tick());
    assert_eq!(a.warned + b.warned, 3);
    assert_eq!(a.errors + b.errors, 0);

    ctx.advance_minutes(5);
    let (a, b) = tokio::join!(ctx.tick(), ctx.tick());
    assert_eq!(a.expired + b.expired, 3);
    assert_eq!(a.errors + b.errors, 0);

    assert_eq!(ctx.audit_count(AuditEventKind::SessionWarned), 3);
    assert_eq!(ctx.audit_count(AuditEventKind::SessionExpired), 3);
    for id in &ids {
        assert_eq!(state_of(&ctx, id), SessionState::Expired);
    }
}

/// Renewal takes precedence over warning and expiry, however long the
/// session has been idle.
#[tokio::test]
async fn test_auto_renew_after_long_idle() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(true)));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;

    // Monitor was down for a while
    ctx.advance_minutes(40);
    let report = ctx.tick().await;

    assert_eq!(report.renewed, 1);
    assert_eq!(report.expired, 0);
    assert_eq!(report.warned, 0);
    assert_eq!(state_of(&ctx, &id), SessionState::Active);
    assert_eq!(ctx.registry.get(&id).unwrap().last_activity, ctx.clock.now());
}

/// Auto-renew with no renew window and no grace still renews at the
/// timeout instead of expiring.
#[tokio::test]
async fn test_auto_renew_with_zero_threshold_and_grace() {
    let mut policy = fixtures::office_policy(true);
    policy.renew_threshold_secs = 0;
    policy.grace_period_secs = 0;
    let ctx = TestContext::with_policies(fixtures::only(policy));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;

    ctx.advance_minutes(30);
    let report = ctx.tick().await;
    assert_eq!(report.renewed, 1);
    assert_eq!(report.expired, 0);
    assert_eq!(state_of(&ctx, &id), SessionState::Active);
}

/// An active session found past its hard limit is warned first and
/// expires on a later tick.
#[tokio::test]
async fn test_overdue_active_session_is_warned_first() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;

    ctx.advance_minutes(31);
    let report = ctx.tick().await;
    assert_eq!(report.warned, 1);
    assert_eq!(report.expired, 0);
    assert_eq!(state_of(&ctx, &id), SessionState::Warned);

    assert_eq!(ctx.tick().await.expired, 1);
    assert_eq!(
        ctx.audit.kinds(),
        vec![
            AuditEventKind::SessionCreated,
            AuditEventKind::SessionWarned,
            AuditEventKind::SessionExpired,
        ]
    );
}

#[tokio::test]
async fn test_short_timeout_expiry_alerts_admins() {
    let ctx = TestContext::new();
    let id = ctx.login(fixtures::admin("root"), "10.0.0.1").await;
    ctx.api.record_activity(&id).unwrap();

    ctx.advance_minutes(9);
    assert_eq!(ctx.tick().await.warned, 1);
    assert_eq!(ctx.alerts.count("session_expiring"), 1);
    ctx.clear_captured();

    ctx.advance_minutes(2);
    assert_eq!(ctx.tick().await.expired, 1);

    let alerts = ctx.alerts.captured();
    assert_eq!(alerts.len(), 1);
    match &alerts[0] {
        Alert::ShortTimeoutExpiry {
            session_id,
            policy,
            timeout_secs,
            action_count,
            ..
        } => {
            assert_eq!(session_id, &id);
            assert_eq!(policy, "admin");
            assert_eq!(*timeout_secs, 600);
            assert_eq!(*action_count, 1);
        }
        other => panic!("unexpected alert: {:?}", other),
    }
}

#[tokio::test]
async fn test_activity_on_warned_session_defers_expiry() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;

    ctx.advance_minutes(26);
    ctx.tick().await;
    assert_eq!(state_of(&ctx, &id), SessionState::Warned);

    ctx.api.record_activity(&id).unwrap();
    ctx.advance_minutes(26);
    let report = ctx.tick().await;
    assert_eq!(report.expired, 0);
    assert_eq!(report.warned, 0);
    assert_eq!(state_of(&ctx, &id), SessionState::Warned);

    ctx.advance_minutes(5);
    assert_eq!(ctx.tick().await.expired, 1);
}

#[tokio::test]
async fn test_failing_collaborators_do_not_block_expiry() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;
    ctx.clear_captured();

    ctx.audit.set_should_fail(true);
    ctx.alerts.set_should_fail(true);

    ctx.advance_minutes(26);
    let report = ctx.tick().await;
    assert_eq!(report.warned, 1);
    assert_eq!(report.errors, 0);

    ctx.advance_minutes(5);
    let report = ctx.tick().await;
    assert_eq!(report.expired, 1);

    let session = ctx.registry.get(&id).unwrap();
    assert_eq!(session.state, SessionState::Expired);
    assert!(session.ended_at.is_some());
    assert!(ctx.audit.captured().is_empty());
    assert!(ctx.alerts.captured().is_empty());
}

#[tokio::test]
async fn test_sessions_created_mid_run_are_picked_up_next_tick() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    ctx.login(fixtures::user("alice"), "10.0.0.1").await;

    let report = ctx.tick().await;
    assert_eq!(report.evaluated, 1);

    ctx.login(fixtures::user("bob"), "10.0.0.2").await;
    let report = ctx.tick().await;
    assert_eq!(report.evaluated, 2);
}

#[tokio::test]
async fn test_monitor_handle_runs_and_stops() {
    let ctx = TestContext::with_policies(fixtures::only(fixtures::office_policy(false)));
    let id = ctx.login(fixtures::user("alice"), "10.0.0.1").await;
    ctx.advance_minutes(26);
    ctx.tick().await;
    ctx.advance_minutes(10);

    let handle = ctx.monitor.clone().start();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(handle.is_running());

    handle.stop().await.unwrap();
    assert_eq!(state_of(&ctx, &id), SessionState::Expired);
    assert_eq!(ctx.audit_count(AuditEventKind::SessionExpired), 1);
}
