//! Property-based invariants for complete render sessions.
//!
//! Lists mix leaves, malformed items, and lazy references to a fixed
//! collection; the live cap is drawn at random. For any such input:
//!
//! 1. Attached elements never exceed the live cap on any frame.
//! 2. The session finishes and resolves with the number of buildable items
//!    after expansion.
//! 3. The surface ends with the last `min(rendered, cap)` elements in list
//!    order.
//! 4. Every handle not on the surface is back in the pool (none leak).
//! 5. Each lazy reference is fetched exactly once.

use proptest::prelude::*;
use trickle_core::item::RenderItem;
use trickle_harness::{HarnessDriver, HarnessOptions, ScriptedSource};
use trickle_runtime::{Phase, ScorerConfig};

const LAZY_CHILDREN: usize = 3;

#[derive(Debug, Clone)]
enum Slot {
    Leaf,
    Malformed,
    Lazy,
}

fn slot_strategy() -> impl Strategy<Value = Slot> {
    prop_oneof![
        6 => Just(Slot::Leaf),
        1 => Just(Slot::Malformed),
        1 => Just(Slot::Lazy),
    ]
}

/// Build the list and the titles it should render to, in order.
fn build(slots: &[Slot]) -> (Vec<RenderItem>, Vec<String>) {
    let mut items = Vec::with_capacity(slots.len());
    let mut expected = Vec::new();
    for (i, slot) in slots.iter().enumerate() {
        match slot {
            Slot::Leaf => {
                let title = format!("leaf {i}");
                expected.push(title.clone());
                items.push(RenderItem::button(title));
            }
            Slot::Malformed => items.push(RenderItem::default()),
            Slot::Lazy => {
                items.push(RenderItem::lazy("shared.json"));
                expected.extend((0..LAZY_CHILDREN).map(|c| format!("child {c}")));
            }
        }
    }
    (items, expected)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn sessions_respect_the_live_window(
        slots in proptest::collection::vec(slot_strategy(), 0..60),
        cap in 1usize..30,
    ) {
        let children = (0..LAZY_CHILDREN).map(|c| RenderItem::card(format!("child {c}"))).collect();
        let source = ScriptedSource::new().with_collection("shared.json", children);
        let options = HarnessOptions::default();
        let config = options
            .config
            .clone()
            .with_scorer(ScorerConfig { worker_threshold: usize::MAX, ..ScorerConfig::default() })
            .with_live_cap(cap, cap);
        let mut driver = HarnessDriver::new(source, options.with_config(config));

        let (items, expected) = build(&slots);
        let lazy_count = slots.iter().filter(|s| matches!(s, Slot::Lazy)).count();
        let handle = driver.render(items);
        driver.set_auto_reach_tail(true);

        let mut max_attached = 0;
        let finished = driver.run_until(5_000, |d| {
            max_attached = max_attached.max(d.surface().attached_len());
            d.renderer().phase() == Phase::Finished
        });

        // 1
        prop_assert!(max_attached <= cap);
        // 2
        prop_assert!(finished);
        let rendered = handle.try_outcome().and_then(Result::ok).and_then(|o| o.rendered());
        prop_assert_eq!(rendered, Some(expected.len()));
        // 3
        let keep = expected.len().min(cap);
        prop_assert_eq!(driver.surface().titles(), expected[expected.len() - keep..].to_vec());
        // 4
        let snap = driver.snapshot();
        prop_assert_eq!(snap.pool_in_use, driver.surface().attached_len());
        // 5
        prop_assert_eq!(driver.source().calls_for("shared.json"), lazy_count);
    }
}
