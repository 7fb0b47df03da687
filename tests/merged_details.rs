// tests/merged_details.rs
// Batched detail fetching: one details() call covers every new id, every
// id is recorded, and policy plus fan-out run once for the merged content.

mod common;

use common::{base_config, now_ts, Harness};
use feedrelay::store::ArticleStore;

fn batched_harness() -> Harness {
    let mut cfg = base_config(&["CaseGetter.x CasePusher..dest"]);
    cfg.alert.to = vec!["AlertPusher..ops".to_string()];
    let h = Harness::new(cfg);
    h.engine.update_getters();
    h.script.set_batched(true);
    h
}

#[tokio::test]
async fn merged_fetch_records_all_ids_and_pushes_once() {
    let h = batched_harness();
    let ts = now_ts();
    h.script.push_item("1", "one", ts);
    h.script.push_item("2", "two", ts);
    h.script.push_item("3", "three", ts);

    let report = h.refresh("CaseGetter.x").await;
    assert_eq!(report.len(), 3);
    for id in ["CaseGetter_1", "CaseGetter_2", "CaseGetter_3"] {
        assert!(h.store.exists(id).unwrap());
    }

    let pushed = h.pushes.entries();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].text, "one\ntwo\nthree");
}

#[tokio::test]
async fn batched_failure_is_an_item_fault_not_a_cycle_failure() {
    let h = batched_harness();
    h.script.push_item("1", "one", now_ts());
    h.script.push_ghost("ghost");

    let report = h.refresh("CaseGetter.x").await;
    assert!(report.is_empty());
    assert_eq!(h.pushes.len(), 0);

    // Nothing was recorded, so the whole batch is retried next cycle.
    assert!(!h.store.exists("CaseGetter_1").unwrap());

    let slot = h.engine.get_slot("CaseGetter.x").unwrap();
    assert_eq!(slot.consecutive_failures(), 0);
    assert_eq!(h.alerts.len(), 1);
}

#[tokio::test]
async fn policy_can_disable_the_batched_path() {
    let h = batched_harness();
    let mut cfg = h.config.snapshot().as_ref().clone();
    cfg.policy.merged_details = false;
    h.config.replace(cfg);

    let ts = now_ts();
    h.script.push_item("1", "one", ts);
    h.script.push_item("2", "two", ts);

    let report = h.refresh("CaseGetter.x").await;
    assert_eq!(report.len(), 2);
    // Per-item path: one push per item, not a merged one.
    let mut texts: Vec<String> = h.pushes.entries().into_iter().map(|e| e.text).collect();
    texts.sort();
    assert_eq!(texts, vec!["one", "two"]);
}
