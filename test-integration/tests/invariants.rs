use std::time::Duration;

use fleetwatch_devkit::{Outcome, SentKind, TestHarness, PREVIEW_PNG};
use fleetwatch_kernel::dispatcher::HANDLED_NOTICE;
use fleetwatch_kernel::{DispatchOutcome, HealthMonitor, HostError, HostStatus, SweepReport};
use tokio::time::Instant;
use test_integration::assert_cards_mirror_hosts;

async fn bring_down(h: &TestHarness, id: &str) {
    h.sweep().await;
    h.set_reachable(id, false);
    h.sweeps(h.policy.failure_threshold as usize).await;
}

#[tokio::test]
async fn repeated_transition_has_no_side_effects() {
    let h = TestHarness::builder().host("anna-01").build();
    bring_down(&h, "anna-01").await;
    let host = h.host("anna-01");

    let cid = h.correlation_id("anna-01").unwrap();
    let sent = h.gateway.sent().len();
    let calls = h.runner.calls().len();
    let events = h.drain_events().len();
    assert!(events > 0);

    host.transition(HostStatus::Down).await.unwrap();
    host.transition(HostStatus::Down).await.unwrap();

    assert_eq!(h.correlation_id("anna-01").unwrap(), cid);
    assert_eq!(h.gateway.sent().len(), sent);
    assert_eq!(h.runner.calls().len(), calls);
    assert!(!host.snapshot().retest_pending);
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn unknown_is_never_a_transition_target() {
    let h = TestHarness::builder().host("anna-01").build();
    h.sweep().await;

    let err = h.host("anna-01").transition(HostStatus::Unknown).await.unwrap_err();
    assert!(matches!(err, HostError::ProtocolViolation { target: HostStatus::Unknown, .. }));
    assert_eq!(h.status("anna-01"), HostStatus::Normal);
}

#[tokio::test]
async fn probe_timeout_counts_as_failure() {
    let h = TestHarness::builder().host("anna-01").build();
    h.sweep().await;
    h.set_probe("anna-01", Outcome::Timeout);
    h.sweeps(2).await;
    assert_eq!(h.status("anna-01"), HostStatus::Down);
}

#[tokio::test]
async fn successful_probe_resets_the_failure_count() {
    let h = TestHarness::builder().failure_threshold(3).host("anna-01").build();
    h.sweep().await;
    h.set_reachable("anna-01", false);
    h.sweeps(2).await;
    h.set_reachable("anna-01", true);
    h.sweep().await;
    assert_eq!(h.host("anna-01").snapshot().consecutive_failures, 0);

    h.set_reachable("anna-01", false);
    h.sweeps(2).await;
    assert_eq!(h.status("anna-01"), HostStatus::Normal);
}

#[tokio::test]
async fn failed_probes_while_waiting_do_not_escalate() {
    let h = TestHarness::builder().host("anna-01").build();
    bring_down(&h, "anna-01").await;
    let cid = h.correlation_id("anna-01").unwrap();
    h.click(&cid, "jane").await;

    h.sweeps(5).await;

    assert_eq!(h.status("anna-01"), HostStatus::WaitingReboot);
    assert_eq!(h.host("anna-01").snapshot().consecutive_failures, 0);
    assert_eq!(h.correlation_id("anna-01").unwrap(), cid);
    assert_eq!(h.runner.count("power-reset"), 1);
}

#[tokio::test(start_paused = true)]
async fn early_recovery_cancels_the_retest_timer() {
    let h = TestHarness::builder().host("anna-01").build();
    bring_down(&h, "anna-01").await;
    let cid = h.correlation_id("anna-01").unwrap();
    h.click(&cid, "jane").await;
    assert!(h.host("anna-01").snapshot().retest_pending);

    h.set_reachable("anna-01", true);
    h.sweep().await;
    assert_eq!(h.status("anna-01"), HostStatus::Normal);
    assert!(!h.host("anna-01").snapshot().retest_pending);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.status("anna-01"), HostStatus::Normal);
}

#[tokio::test]
async fn second_click_on_the_same_card_is_already_handled() {
    let h = TestHarness::builder().host("anna-01").build();
    bring_down(&h, "anna-01").await;
    let cid = h.correlation_id("anna-01").unwrap();

    assert_eq!(h.click(&cid, "jane").await, DispatchOutcome::Started);
    assert_eq!(h.click(&cid, "bob").await, DispatchOutcome::AlreadyHandled);

    assert_eq!(h.runner.count("power-reset"), 1);
    assert_eq!(h.gateway.ephemerals_for("U-bob"), vec![HANDLED_NOTICE.to_string()]);
    assert!(h.gateway.ephemerals_for("U-jane").is_empty());
}

#[tokio::test]
async fn non_reboot_actions_are_ignored() {
    let h = TestHarness::builder().host("anna-01").build();
    bring_down(&h, "anna-01").await;
    let cid = h.correlation_id("anna-01").unwrap();

    let mut action = h.action(&cid, "jane");
    action.action = "snooze".into();
    assert_eq!(h.dispatcher.dispatch(&action).await, DispatchOutcome::Ignored);
    assert_eq!(h.status("anna-01"), HostStatus::Down);
}

#[tokio::test]
async fn click_racing_a_sweep_runs_one_power_cycle() {
    let h = TestHarness::builder().host("anna-01").build();
    bring_down(&h, "anna-01").await;
    let cid = h.correlation_id("anna-01").unwrap();

    let (outcome, _) = tokio::join!(h.click(&cid, "jane"), h.sweep());

    assert_eq!(outcome, DispatchOutcome::Started);
    assert_eq!(h.status("anna-01"), HostStatus::WaitingReboot);
    assert_eq!(h.runner.count("power-reset"), 1);
    assert_cards_mirror_hosts(&h);
}

#[tokio::test]
async fn host_without_power_only_reboots_on_request() {
    let h = TestHarness::builder()
        .supervised_by_default(false)
        .host_without_power("anna-02")
        .build();
    assert!(h.host("anna-02").snapshot().supervised);

    bring_down(&h, "anna-02").await;
    h.sweeps(3).await;

    assert_eq!(h.status("anna-02"), HostStatus::Down);
    assert!(h
        .drain_events()
        .iter()
        .all(|e| e.to != HostStatus::WaitingReboot));
    let cid = h.correlation_id("anna-02").unwrap();
    assert!(h.gateway.last_payload(&cid).unwrap().has_action("reboot"));

    // the request is honoured, the power cycle cannot run, the host stays down
    assert_eq!(h.click(&cid, "jane").await, DispatchOutcome::Started);
    let events = h.drain_events();
    assert_eq!(events[0].to, HostStatus::WaitingReboot);
    assert_eq!(events[1].to, HostStatus::Down);
    assert_eq!(h.status("anna-02"), HostStatus::Down);
    assert_eq!(h.runner.count("power-reset"), 0);

    let retired = h.gateway.last_payload(&cid).unwrap().text;
    assert!(retired.contains("Remote power command failed"));
    assert_ne!(h.correlation_id("anna-02").unwrap(), cid);
    assert_cards_mirror_hosts(&h);
}

#[tokio::test(start_paused = true)]
async fn card_post_retries_after_gateway_errors() {
    let h = TestHarness::builder().host("anna-01").build();
    h.sweep().await;
    h.set_reachable("anna-01", false);
    h.sweep().await;

    h.gateway.fail_next(2);
    h.sweep().await;

    assert_eq!(h.status("anna-01"), HostStatus::Down);
    assert_eq!(h.gateway.count(SentKind::Post), 1);
    let card = h.active_card("anna-01").unwrap();
    assert!(card.message.is_some());
}

#[tokio::test]
async fn sweep_probes_every_host() {
    let h = TestHarness::builder()
        .host("anna-01")
        .host("anna-02")
        .host_without_power("anna-03")
        .build();
    h.set_reachable("anna-02", false);

    let report = h.sweep().await;

    assert_eq!(report.ok, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(h.runner.count("probe"), 3);
    assert_eq!(h.status("anna-01"), HostStatus::Normal);
    assert_eq!(h.status("anna-02"), HostStatus::Unknown);
    assert_eq!(h.status("anna-03"), HostStatus::Normal);
}

#[tokio::test]
async fn panicking_host_does_not_abort_the_sweep() {
    let h = TestHarness::builder()
        .host("anna-01")
        .host("anna-02")
        .host("anna-03")
        .build();
    h.set_probe("anna-02", Outcome::Panic);

    let report = h.sweep().await;

    assert_eq!(report, SweepReport { ok: 2, failed: 1 });
    assert_eq!(h.status("anna-01"), HostStatus::Normal);
    assert_eq!(h.status("anna-02"), HostStatus::Unknown);
    assert_eq!(h.status("anna-03"), HostStatus::Normal);

    // the host is still usable afterwards
    h.set_reachable("anna-02", true);
    assert_eq!(h.sweep().await, SweepReport { ok: 3, failed: 0 });
    assert_eq!(h.status("anna-02"), HostStatus::Normal);
}

/// Probes run so far, read `secs` after `start`.
async fn probes_at(h: &TestHarness, start: Instant, secs: u64) -> usize {
    tokio::time::sleep_until(start + Duration::from_secs(secs)).await;
    h.runner.count("probe")
}

#[tokio::test(start_paused = true)]
async fn overrunning_sweep_keeps_the_tick_schedule() {
    let h = TestHarness::builder().host("anna-01").build();
    assert_eq!(h.policy.sweep_period(), Duration::from_secs(60));
    h.runner.stall_next("anna-01.probe", Duration::from_secs(90));

    let start = Instant::now();
    let monitor = HealthMonitor::new(h.hosts.clone(), h.policy.sweep_period()).spawn();

    assert_eq!(probes_at(&h, start, 1).await, 1);
    // the tick missed at 60s fires as soon as the slow sweep ends
    assert_eq!(probes_at(&h, start, 91).await, 2);
    // then back on the 60s grid: 120, 180, not 150, 210
    assert_eq!(probes_at(&h, start, 119).await, 2);
    assert_eq!(probes_at(&h, start, 121).await, 3);
    assert_eq!(probes_at(&h, start, 179).await, 3);
    assert_eq!(probes_at(&h, start, 181).await, 4);

    monitor.abort();
}

#[tokio::test(start_paused = true)]
async fn console_capture_runs_only_while_down() {
    let h = TestHarness::builder().with_preview().host("anna-01").build();
    assert_eq!(h.policy.preview_interval(), Duration::from_secs(30));
    bring_down(&h, "anna-01").await;
    assert_eq!(h.status("anna-01"), HostStatus::Down);

    // captures at 0, 30, 60 and 90 seconds
    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(h.preview.count("anna-01.bmc"), 4);
    let shot = h.host("anna-01").latest_preview().unwrap();
    assert_eq!(shot.png, PREVIEW_PNG);

    h.set_reachable("anna-01", true);
    h.sweep().await;
    assert_eq!(h.status("anna-01"), HostStatus::Normal);
    assert!(h.host("anna-01").latest_preview().is_none());

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(h.preview.count("anna-01.bmc"), 4);
}

#[tokio::test(start_paused = true)]
async fn console_capture_needs_a_power_controller() {
    let h = TestHarness::builder().with_preview().host_without_power("anna-02").build();
    bring_down(&h, "anna-02").await;

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(h.preview.total(), 0);
    assert!(h.host("anna-02").latest_preview().is_none());
}

#[tokio::test]
async fn transitions_do_not_need_an_event_listener() {
    let h = TestHarness::builder().host("anna-01").build();
    h.close_events();

    bring_down(&h, "anna-01").await;
    assert_eq!(h.status("anna-01"), HostStatus::Down);
    assert_eq!(h.gateway.count(SentKind::Post), 1);

    let cid = h.correlation_id("anna-01").unwrap();
    assert_eq!(h.click(&cid, "jane").await, DispatchOutcome::Started);
    assert_eq!(h.status("anna-01"), HostStatus::WaitingReboot);
}
