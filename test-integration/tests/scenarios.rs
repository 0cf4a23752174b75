use std::time::Duration;

use fleetwatch_devkit::{Outcome, SentKind, TestHarness};
use fleetwatch_kernel::dispatcher::STALE_NOTICE;
use fleetwatch_kernel::{DispatchOutcome, HostStatus};
use test_integration::{assert_cards_mirror_hosts, visible_text};

const PAST_RECOVERY_WINDOW: Duration = Duration::from_secs(301);
const SETTLE: Duration = Duration::from_secs(5);

/// Host reaches NORMAL, then fails `threshold` sweeps in a row.
async fn bring_down(h: &TestHarness, id: &str) {
    h.sweep().await;
    assert_eq!(h.status(id), HostStatus::Normal);
    h.set_reachable(id, false);
    for _ in 0..h.policy.failure_threshold {
        h.sweep().await;
    }
}

#[tokio::test]
async fn scenario_a_threshold_failures_open_a_card_with_the_button() {
    let h = TestHarness::builder().failure_threshold(3).host("elsa-01").build();

    h.sweep().await;
    assert_eq!(h.status("elsa-01"), HostStatus::Normal);
    assert!(h.gateway.sent().is_empty(), "a healthy host posts nothing");

    h.set_reachable("elsa-01", false);
    h.sweeps(2).await;
    assert_eq!(h.status("elsa-01"), HostStatus::Normal);
    assert_eq!(h.host("elsa-01").snapshot().consecutive_failures, 2);
    assert!(h.active_card("elsa-01").is_none());

    h.sweep().await;
    assert_eq!(h.status("elsa-01"), HostStatus::Down);
    assert_eq!(h.gateway.count(SentKind::Post), 1);

    let cid = h.correlation_id("elsa-01").unwrap();
    let payload = h.gateway.last_payload(&cid).unwrap();
    assert!(payload.title.contains("elsa-01"));
    assert!(payload.has_action("reboot"));
    assert!(!payload.text.contains("requested"));
    assert_eq!(h.runner.count("power-reset"), 0, "supervised host waits for a human");
    assert_cards_mirror_hosts(&h);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_human_reboot_then_recovery() {
    let h = TestHarness::builder().host("elsa-01").build();
    bring_down(&h, "elsa-01").await;
    assert_eq!(h.status("elsa-01"), HostStatus::Down);
    let cid = h.correlation_id("elsa-01").unwrap();

    h.timeline.clear();
    assert_eq!(h.click(&cid, "jane").await, DispatchOutcome::Started);
    assert_eq!(h.status("elsa-01"), HostStatus::WaitingReboot);
    assert!(h.host("elsa-01").snapshot().retest_pending);

    // the card says who asked before the power controller is touched
    let updated = h.timeline.position(&format!("update {cid}")).unwrap();
    let reset = h.timeline.position("run power-reset").unwrap();
    let power_on = h.timeline.position("run power-on").unwrap();
    assert!(updated < reset && reset < power_on);
    let text = visible_text(&h, "elsa-01");
    assert!(text.contains("Reboot requested by <@U-jane>"));
    assert!(text.contains("Rebooting"));
    assert!(h.gateway.last_payload(&cid).unwrap().actions.is_empty());
    assert_cards_mirror_hosts(&h);

    tokio::time::sleep(PAST_RECOVERY_WINDOW).await;
    h.wait_for_status("elsa-01", HostStatus::TestingReboot, SETTLE).await.unwrap();
    assert_cards_mirror_hosts(&h);

    h.set_reachable("elsa-01", true);
    h.sweep().await;
    assert_eq!(h.status("elsa-01"), HostStatus::Normal);
    assert!(visible_text(&h, "elsa-01").contains("Host is responding again"));
    assert_eq!(h.gateway.count(SentKind::Post), 1, "one message per episode, updated in place");
    assert_cards_mirror_hosts(&h);
}

#[tokio::test]
async fn scenario_c_automatic_reboot_failure_drops_to_supervised() {
    let h = TestHarness::builder().supervised_by_default(false).host("elsa-02").build();
    h.set_power("elsa-02", Outcome::Fail);
    assert!(!h.host("elsa-02").snapshot().supervised);

    bring_down(&h, "elsa-02").await;

    assert_eq!(h.status("elsa-02"), HostStatus::Down);
    assert!(h.host("elsa-02").snapshot().supervised);
    assert_eq!(h.runner.count("power-reset"), 1);
    assert_eq!(h.runner.count("power-on"), 0);

    let sent = h.gateway.sent();
    let first_cid = sent[0].payload.as_ref().unwrap().callback_id.clone();
    let current_cid = h.correlation_id("elsa-02").unwrap();
    assert_ne!(first_cid, current_cid);
    assert!(h.registry.resolve(&first_cid).is_none(), "old episode no longer takes clicks");

    let retired = h.gateway.last_payload(&first_cid).unwrap().text;
    assert!(retired.contains("Reboot requested automatically"));
    assert!(retired.contains("Remote power command failed"));
    assert!(retired.contains("Switched to supervised mode"));

    let fresh = h.gateway.last_payload(&current_cid).unwrap();
    assert!(fresh.text.contains("stopped responding again"));
    assert!(fresh.has_action("reboot"));
    assert_cards_mirror_hosts(&h);

    // now supervised: further failed sweeps do not retry on their own
    h.sweeps(3).await;
    assert_eq!(h.runner.count("power-reset"), 1);
    assert_eq!(h.correlation_id("elsa-02").unwrap(), current_cid);
}

#[tokio::test]
async fn scenario_d_unknown_correlation_id_is_answered_as_stale() {
    let h = TestHarness::builder().host("elsa-03").build();
    bring_down(&h, "elsa-03").await;
    let before = h.gateway.sent().len();

    assert_eq!(h.click("never-issued", "bob").await, DispatchOutcome::Stale);

    assert_eq!(h.status("elsa-03"), HostStatus::Down);
    assert_eq!(h.runner.count("power-reset"), 0);
    assert_eq!(h.gateway.ephemerals_for("U-bob"), vec![STALE_NOTICE.to_string()]);
    assert_eq!(h.gateway.sent().len(), before + 1);
}

#[tokio::test]
async fn scenario_d_superseded_episode_is_stale() {
    let h = TestHarness::builder().host("elsa-03").build();
    bring_down(&h, "elsa-03").await;
    let old_cid = h.correlation_id("elsa-03").unwrap();

    // recovers on its own, then goes down again
    h.set_reachable("elsa-03", true);
    h.sweep().await;
    h.set_reachable("elsa-03", false);
    h.sweeps(2).await;
    let new_cid = h.correlation_id("elsa-03").unwrap();
    assert_ne!(old_cid, new_cid);

    assert_eq!(h.click(&old_cid, "bob").await, DispatchOutcome::Stale);
    assert_eq!(h.status("elsa-03"), HostStatus::Down);
    assert_eq!(h.runner.count("power-reset"), 0);
    assert_eq!(h.click(&new_cid, "bob").await, DispatchOutcome::Started);
}

#[tokio::test(start_paused = true)]
async fn scenario_e_recovery_restores_automatic_mode_once() {
    let h = TestHarness::builder().supervised_by_default(false).host("elsa-04").build();
    bring_down(&h, "elsa-04").await;
    assert_eq!(h.status("elsa-04"), HostStatus::WaitingReboot, "automatic host reboots itself");

    tokio::time::sleep(PAST_RECOVERY_WINDOW).await;
    h.wait_for_status("elsa-04", HostStatus::TestingReboot, SETTLE).await.unwrap();

    // the reboot did not hold
    h.sweep().await;
    assert_eq!(h.status("elsa-04"), HostStatus::Down);
    assert!(h.host("elsa-04").snapshot().supervised);
    let cid = h.correlation_id("elsa-04").unwrap();

    assert_eq!(h.click(&cid, "jane").await, DispatchOutcome::Started);
    tokio::time::sleep(PAST_RECOVERY_WINDOW).await;
    h.wait_for_status("elsa-04", HostStatus::TestingReboot, SETTLE).await.unwrap();

    h.set_reachable("elsa-04", true);
    h.sweep().await;
    assert_eq!(h.status("elsa-04"), HostStatus::Normal);
    assert!(!h.host("elsa-04").snapshot().supervised, "back to the fleet default");

    let annotated = h
        .gateway
        .card_messages(&cid)
        .iter()
        .filter(|m| m.payload.as_ref().unwrap().text.contains("Switched back to automatic mode"))
        .count();
    assert_eq!(annotated, 1);
    assert!(!h.active_card("elsa-04").unwrap().recovering_to_automatic);
    assert_cards_mirror_hosts(&h);
}
