//! Fast-path equivalence: for randomized keyed-list mutations, the DOM
//! produced with the bulk rebuild enabled is observationally identical to
//! the general per-node diff.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use weft::{component, el, text, Document, NodeId, Runtime, StateHandle, VNode};

type Item = (u8, u8); // (key, label)

fn dedupe(raw: Vec<Item>) -> Vec<Item> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter().filter(|(k, _)| seen.insert(*k)).collect()
}

fn build_row((key, label): Item) -> VNode {
    el("li")
        .key(format!("k{key}"))
        .attr("label", label as i64)
        .child(text(format!("item {key}")))
        .into()
}

struct Fixture {
    rt: Runtime,
    doc: Rc<RefCell<Document>>,
    host: NodeId,
    source: Rc<RefCell<Vec<Item>>>,
    setter: Rc<RefCell<Option<StateHandle<i64>>>>,
    _handle: weft::MountHandle,
}

fn mount_list(fast_path: bool, initial: &[Item]) -> Fixture {
    let rt = Runtime::new();
    rt.set_keyed_fast_path(fast_path);
    let doc = Rc::new(RefCell::new(Document::new()));
    let host = doc.borrow_mut().create_element("app");

    let source = Rc::new(RefCell::new(initial.to_vec()));
    let setter: Rc<RefCell<Option<StateHandle<i64>>>> = Rc::new(RefCell::new(None));

    let source_slot = source.clone();
    let setter_slot = setter.clone();
    let list = component(move |scope, _| {
        let (_version, set) = scope.use_state(|| 0i64)?;
        *setter_slot.borrow_mut() = Some(set);
        let rows: Vec<VNode> = source_slot.borrow().iter().copied().map(build_row).collect();
        Ok(el("ul").children(rows).into())
    });

    let handle = rt.mount(&doc, list.into(), host).unwrap();
    Fixture { rt, doc, host, source, setter, _handle: handle }
}

impl Fixture {
    fn update(&self, next: &[Item]) {
        *self.source.borrow_mut() = next.to_vec();
        let set = self.setter.borrow().clone().unwrap();
        set.update(|v| v + 1).unwrap();
        // Quiescent after the update's flush.
        assert_eq!(self.rt.scheduler_state().queue_length, 0);
    }

    fn snapshot(&self) -> String {
        self.doc.borrow().snapshot(self.host)
    }

    fn list_children(&self) -> Vec<NodeId> {
        let ul = self.doc.borrow().children(self.host)[0];
        self.doc.borrow().children(ul).to_vec()
    }
}

/// Run the same mutation on both engines and return both final snapshots.
fn run_both(initial: &[Item], updated: &[Item]) -> (String, String) {
    let fast = mount_list(true, initial);
    let general = mount_list(false, initial);
    assert_eq!(fast.snapshot(), general.snapshot());

    fast.update(updated);
    general.update(updated);
    (fast.snapshot(), general.snapshot())
}

fn pseudo_shuffle<T>(items: &mut [T], mut seed: u64) {
    for i in (1..items.len()).rev() {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = ((seed >> 33) as usize) % (i + 1);
        items.swap(i, j);
    }
}

// =============================================================================
// Deterministic Cases
// =============================================================================

#[test]
fn test_large_reversal_preserves_node_identity() {
    let initial: Vec<Item> = (0..150).map(|i| (i as u8, 7)).collect();
    let reversed: Vec<Item> = initial.iter().rev().copied().collect();

    let fixture = mount_list(true, &initial);
    let before = fixture.list_children();

    // 150 keyed items, 149 diverging positions, zero deltas: this is the
    // bulk-rebuild territory. Every node must survive, relocated.
    fixture.update(&reversed);
    let after = fixture.list_children();

    let mut expected = before.clone();
    expected.reverse();
    assert_eq!(after, expected);
}

#[test]
fn test_large_reversal_matches_general_diff() {
    let initial: Vec<Item> = (0..150).map(|i| (i as u8, 3)).collect();
    let reversed: Vec<Item> = initial.iter().rev().copied().collect();

    let (fast, general) = run_both(&initial, &reversed);
    assert_eq!(fast, general);
}

#[test]
fn test_prop_delta_disqualifies_but_stays_equivalent() {
    let initial: Vec<Item> = (0..150).map(|i| (i as u8, 0)).collect();
    let mut updated: Vec<Item> = initial.iter().rev().copied().collect();
    // One changed label forces the general path even on a pathological
    // reorder; output must be identical either way, with the attribute
    // update applied.
    updated[40].1 = 9;

    let (fast, general) = run_both(&initial, &updated);
    assert_eq!(fast, general);
    assert!(fast.contains("label=9"));
}

#[test]
fn test_shrink_and_grow_matches_general_diff() {
    let initial: Vec<Item> = (0..180).map(|i| (i as u8, 1)).collect();
    let mut updated = initial.clone();
    pseudo_shuffle(&mut updated, 0xC0FFEE);
    updated.truncate(90);
    updated.extend((200..230).map(|i| (i as u8, 2)));

    let (fast, general) = run_both(&initial, &updated);
    assert_eq!(fast, general);
}

// =============================================================================
// Randomized Equivalence
// =============================================================================

fn scenario() -> impl Strategy<Value = (Vec<Item>, Vec<Item>)> {
    (
        prop::collection::vec((any::<u8>(), any::<u8>()), 130..200),
        any::<u64>(),
        any::<bool>(),
        0usize..40,
        0usize..20,
    )
        .prop_map(|(raw, seed, mutate_labels, drop_count, add_count)| {
            let initial = dedupe(raw);
            let mut updated = initial.clone();
            pseudo_shuffle(&mut updated, seed);
            if mutate_labels {
                for (i, item) in updated.iter_mut().enumerate() {
                    if i % 7 == 0 {
                        item.1 = item.1.wrapping_add(1);
                    }
                }
            }
            let keep = updated.len().saturating_sub(drop_count);
            updated.truncate(keep);
            // Fresh keys reuse the dropped id space, shifted by the seed.
            let added = (0..add_count)
                .map(|i| ((seed as u8).wrapping_add(i as u8), i as u8))
                .collect::<Vec<_>>();
            updated.extend(added);
            (initial, dedupe(updated))
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_fast_path_equivalent_to_general_diff((initial, updated) in scenario()) {
        let (fast, general) = run_both(&initial, &updated);
        prop_assert_eq!(fast, general);
    }

    #[test]
    fn prop_pure_permutation_preserves_identity(
        (initial, _) in scenario(),
        seed in any::<u64>(),
    ) {
        let mut permuted = initial.clone();
        pseudo_shuffle(&mut permuted, seed);

        let fixture = mount_list(true, &initial);
        let before: std::collections::HashSet<NodeId> =
            fixture.list_children().into_iter().collect();

        fixture.update(&permuted);
        let after: std::collections::HashSet<NodeId> =
            fixture.list_children().into_iter().collect();

        // A permutation with unchanged props relocates, never recreates.
        prop_assert_eq!(before, after);
    }
}
