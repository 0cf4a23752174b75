//! Shared checks for the end-to-end scenarios under `tests/`.

use fleetwatch_devkit::TestHarness;

/// The active card of every host mirrors that host's status.
pub fn assert_cards_mirror_hosts(harness: &TestHarness) {
    for host in &harness.hosts {
        let snapshot = host.snapshot();
        if let Some(card) = harness.active_card(host.id()) {
            assert_eq!(
                card.status, snapshot.status,
                "card {} of {} shows {} but the host is {}",
                card.correlation_id,
                host.id(),
                card.status,
                snapshot.status
            );
            assert_eq!(snapshot.active_card.as_deref(), Some(card.correlation_id.as_str()));
        }
    }
}

/// Text the operator currently sees on the host's active card.
pub fn visible_text(harness: &TestHarness, host_id: &str) -> String {
    let cid = harness
        .correlation_id(host_id)
        .unwrap_or_else(|| panic!("{host_id} has no active card"));
    harness
        .gateway
        .last_payload(&cid)
        .map(|p| p.text)
        .unwrap_or_default()
}
