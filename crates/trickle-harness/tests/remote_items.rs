//! Lazy expansion and category lookups against the scripted source.

use std::time::Duration;

use trickle_core::item::{ItemKind, RenderItem};
use trickle_harness::{
    HarnessDriver, HarnessOptions, ScriptedSource, SourceCall, SurfaceOp, leaves,
};
use trickle_runtime::{
    DetachReason, FetchError, FetchPriority, Phase, RenderConfig, ScorerConfig,
};

fn config() -> RenderConfig {
    HarnessOptions::default().config.with_scorer(ScorerConfig {
        worker_threshold: usize::MAX,
        ..ScorerConfig::default()
    })
}

fn driver(source: ScriptedSource) -> HarnessDriver {
    HarnessDriver::new(source, HarnessOptions::default().with_config(config()))
}

fn cards(prefix: &str, n: usize) -> Vec<RenderItem> {
    (0..n).map(|i| RenderItem::card(format!("{prefix} {i}"))).collect()
}

fn rendered(handle: &trickle_runtime::CompletionHandle) -> Option<usize> {
    handle.try_outcome().and_then(Result::ok).and_then(|o| o.rendered())
}

#[test]
fn lazy_slot_expands_in_place() {
    let source = ScriptedSource::new().with_collection("more.json", cards("more", 3));
    let mut items = leaves(10);
    items[5] = RenderItem::lazy("more.json");
    let mut driver = driver(source);
    let handle = driver.render(items);

    // The expansion happened inside the first batch, which grew by two.
    let snap = driver.snapshot();
    assert_eq!(snap.len, 12);
    assert_eq!(driver.surface().attached_len(), 8);
    assert_eq!(snap.batches.expansions, 1);

    driver.set_auto_reach_tail(true);
    assert!(driver.run_until_finished(500));
    assert_eq!(
        driver.surface().titles(),
        vec![
            "item 0", "item 1", "item 2", "item 3", "item 4", "more 0", "more 1", "more 2",
            "item 6", "item 7", "item 8", "item 9",
        ]
    );
    assert_eq!(rendered(&handle), Some(12));
    // Nothing was rendered twice.
    assert_eq!(driver.snapshot().batches.appended, 12);
    assert_eq!(driver.source().calls_for("more.json"), 1);
}

#[test]
fn lazy_slot_in_a_later_batch_keeps_earlier_elements() {
    let source = ScriptedSource::new().with_collection("tail.json", cards("tail", 4));
    let mut items = leaves(12);
    items[9] = RenderItem::lazy("tail.json");
    let mut driver = driver(source);
    let handle = driver.render(items);
    let first: Vec<String> = driver.surface().titles();
    assert_eq!(first.len(), 6);

    driver.set_auto_reach_tail(true);
    assert!(driver.run_until_finished(500));
    assert_eq!(driver.snapshot().len, 15);
    assert_eq!(rendered(&handle), Some(15));
    assert_eq!(&driver.surface().titles()[..6], first.as_slice());
    assert!(
        driver
            .source()
            .calls()
            .contains(&SourceCall::Fetch("tail.json".into(), FetchPriority::Normal))
    );
}

#[test]
fn first_batch_fetches_at_high_priority() {
    let source = ScriptedSource::new().with_collection("head.json", cards("head", 2));
    let mut items = leaves(3);
    items.insert(0, RenderItem::lazy("head.json"));
    let mut driver = driver(source);
    driver.render(items);
    assert_eq!(
        driver.source().calls(),
        vec![SourceCall::Fetch("head.json".into(), FetchPriority::High)]
    );
}

#[test]
fn failed_expansion_skips_the_slot() {
    let mut items = leaves(4);
    items[1] = RenderItem::lazy("missing.json");
    let mut driver = driver(ScriptedSource::new());
    let handle = driver.render(items);

    assert_eq!(driver.surface().titles(), vec!["item 0", "item 2", "item 3"]);
    assert_eq!(driver.snapshot().batches.fetch_failures, 1);
    assert_eq!(rendered(&handle), Some(3));
    // 404 is not retried.
    assert_eq!(driver.source().calls_for("missing.json"), 1);
}

#[test]
fn transient_failures_are_retried() {
    let source = ScriptedSource::new()
        .with_collection("flaky.json", cards("flaky", 2))
        .failing("flaky.json", vec![FetchError::Timeout]);
    let mut items = leaves(2);
    items.push(RenderItem::lazy("flaky.json"));
    let mut driver = driver(source);
    let handle = driver.render(items);

    assert_eq!(rendered(&handle), Some(4));
    assert_eq!(driver.source().calls_for("flaky.json"), 2);
    assert_eq!(driver.snapshot().batches.fetch_failures, 0);
}

#[test]
fn retries_are_bounded() {
    let source = ScriptedSource::new()
        .with_collection("down.json", cards("down", 2))
        .failing("down.json", vec![FetchError::Status(503), FetchError::Status(503)]);
    let mut driver = driver(source);
    let handle = driver.render(vec![RenderItem::lazy("down.json"), RenderItem::button("ok")]);

    assert_eq!(driver.surface().titles(), vec!["ok"]);
    assert_eq!(rendered(&handle), Some(1));
    assert_eq!(driver.source().calls_for("down.json"), 2);
}

#[test]
fn recursive_expansion_stops_at_the_depth_limit() {
    let source = ScriptedSource::new().with_collection(
        "loop.json",
        vec![RenderItem::lazy("loop.json"), RenderItem::button("inner")],
    );
    let config = config().with_max_expansion_depth(2);
    let mut driver = HarnessDriver::new(source, HarnessOptions::default().with_config(config));
    let handle = driver.render(vec![RenderItem::lazy("loop.json")]);
    driver.set_auto_reach_tail(true);
    assert!(driver.run_until_finished(200));

    // Depth 0 and 1 are fetched; the depth-2 reference is dropped.
    assert_eq!(driver.source().calls_for("loop.json"), 2);
    assert_eq!(driver.surface().titles(), vec!["inner", "inner"]);
    assert_eq!(driver.snapshot().batches.fetch_failures, 1);
    assert_eq!(rendered(&handle), Some(2));
}

#[test]
fn category_group_is_filled_when_the_lookup_settles() {
    let source = ScriptedSource::new().with_category(
        "tools",
        Some("Tools"),
        vec![RenderItem::button("grep"), RenderItem::button("sed")],
    );
    let items = vec![
        RenderItem::button("before"),
        RenderItem::category(ItemKind::Card, "tools"),
        RenderItem::button("after"),
    ];
    let mut driver = driver(source);
    let handle = driver.render(items);

    // Placeholder appended with the batch; the list completes without
    // waiting for the lookup.
    assert_eq!(driver.surface().attached_len(), 3);
    let placeholder = &driver.surface().attached()[1];
    assert!(placeholder.element.awaiting_children);
    assert_eq!(rendered(&handle), Some(3));

    driver.frame();
    let group = &driver.surface().attached()[1];
    assert!(!group.element.awaiting_children);
    assert_eq!(group.element.header.as_deref(), Some("Tools"));
    let children: Vec<&str> = group.element.children.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(children, vec!["grep", "sed"]);
    assert!(
        driver
            .surface()
            .ops()
            .contains(&SurfaceOp::Update(group.id))
    );
}

#[test]
fn failed_category_lookup_removes_the_group() {
    let items = vec![
        RenderItem::button("before"),
        RenderItem::category(ItemKind::Button, "gone"),
    ];
    let mut driver = driver(ScriptedSource::new());
    driver.render(items);
    let group_id = driver.surface().attached()[1].id;

    driver.frame();
    assert_eq!(driver.surface().titles(), vec!["before"]);
    assert_eq!(driver.surface().detached(DetachReason::Failed), vec![group_id]);
    assert_eq!(driver.snapshot().batches.group_failures, 1);
    assert_eq!(driver.snapshot().live, 1);
}

#[test]
fn background_fetch_suspends_the_batch() {
    let source = ScriptedSource::new()
        .with_delay(Duration::from_millis(5))
        .with_collection("slow.json", cards("slow", 3));
    let mut items = leaves(8);
    items[2] = RenderItem::lazy("slow.json");
    let options = HarnessOptions::default()
        .with_config(config())
        .with_background_fetch();
    let mut driver = HarnessDriver::new(source, options);
    let handle = driver.render(items);

    // The batch is parked on the fetch; nothing reached the surface yet.
    assert_eq!(driver.renderer().phase(), Phase::Rendering);
    assert_eq!(driver.surface().append_count(), 0);

    assert!(driver.run_until(500, |d| d.surface().append_count() > 0));
    assert_eq!(
        &driver.surface().titles()[..5],
        &["item 0", "item 1", "slow 0", "slow 1", "slow 2"]
    );

    driver.set_auto_reach_tail(true);
    assert!(driver.run_until_finished(2_000));
    assert_eq!(rendered(&handle), Some(10));
}

#[test]
fn clear_during_a_background_fetch_drops_the_batch() {
    let source = ScriptedSource::new()
        .with_delay(Duration::from_millis(20))
        .with_collection("slow.json", cards("slow", 3));
    let options = HarnessOptions::default()
        .with_config(config())
        .with_background_fetch();
    let mut driver = HarnessDriver::new(source, options);
    let handle = driver.render(vec![RenderItem::button("a"), RenderItem::lazy("slow.json")]);
    assert_eq!(driver.renderer().phase(), Phase::Rendering);

    driver.clear();
    assert!(handle.try_outcome().is_some_and(|r| r.is_ok_and(|o| o.is_aborted())));
    std::thread::sleep(Duration::from_millis(40));
    driver.run_frames(5);
    assert_eq!(driver.surface().append_count(), 0);
    assert_eq!(driver.snapshot().pool_in_use, 0);
}
