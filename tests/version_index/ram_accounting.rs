//! RAM Accounting Tests
//!
//! The index's RAM figures are compared against a map-based model of the
//! same operation sequence.

use crate::common::*;
use proptest::prelude::*;
use std::collections::HashMap;
use versionmap::entry_ram_bytes;

#[derive(Debug, Clone)]
enum Op {
    Index(u8, u64),
    Delete(u8, u64, i64),
    RemoveTombstone(u8),
    BeforeRefresh,
    AfterRefresh,
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..24, 1u64..1_000).prop_map(|(k, v)| Op::Index(k, v)),
        3 => (0u8..24, 1u64..1_000, 0i64..10_000).prop_map(|(k, v, t)| Op::Delete(k, v, t)),
        1 => (0u8..24).prop_map(Op::RemoveTombstone),
        1 => Just(Op::BeforeRefresh),
        1 => Just(Op::AfterRefresh),
        1 => Just(Op::Clear),
    ]
}

fn key(k: u8) -> DocId {
    // ids of varying length
    DocId::from(format!("{}{}", "d".repeat(k as usize % 5), k))
}

#[derive(Default)]
struct Model {
    current: HashMap<DocId, VersionEntry>,
    previous: Option<HashMap<DocId, VersionEntry>>,
    tombstones: HashMap<DocId, VersionEntry>,
}

fn cost(map: &HashMap<DocId, VersionEntry>) -> u64 {
    map.iter().map(|(id, entry)| entry_ram_bytes(id, entry)).sum()
}

impl Model {
    fn apply(&mut self, index: &LiveVersionIndex, op: &Op) {
        match *op {
            Op::Index(k, v) => {
                let entry = VersionEntry::live(v, v as i64, 1);
                let id = key(k);
                let _lock = index.acquire_lock(&id);
                index.put_index_under_lock(&id, entry);
                self.tombstones.remove(&id);
                self.current.insert(id.clone(), entry);
            }
            Op::Delete(k, v, t) => {
                let tombstone = VersionEntry::tombstone(v, v as i64, 1, t);
                let id = key(k);
                let _lock = index.acquire_lock(&id);
                index.put_delete_under_lock(&id, tombstone);
                self.current.remove(&id);
                if let Some(previous) = self.previous.as_mut() {
                    previous.remove(&id);
                }
                self.tombstones.insert(id.clone(), tombstone);
            }
            Op::RemoveTombstone(k) => {
                let id = key(k);
                let _lock = index.acquire_lock(&id);
                index.remove_tombstone_under_lock(&id);
                self.tombstones.remove(&id);
            }
            Op::BeforeRefresh => {
                if self.previous.is_none() {
                    index.before_refresh();
                    self.previous = Some(std::mem::take(&mut self.current));
                }
            }
            Op::AfterRefresh => {
                if self.previous.is_some() {
                    index.after_refresh(true);
                    self.previous = None;
                }
            }
            Op::Clear => {
                index.clear();
                *self = Model::default();
            }
        }
    }

    fn get(&self, id: &DocId) -> Option<VersionEntry> {
        self.current
            .get(id)
            .or_else(|| self.previous.as_ref().and_then(|p| p.get(id)))
            .or_else(|| self.tombstones.get(id))
            .copied()
    }

    fn previous_cost(&self) -> u64 {
        self.previous.as_ref().map_or(0, cost)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn ram_figures_match_model(ops in proptest::collection::vec(op_strategy(), 0..96)) {
        let index = LiveVersionIndex::new();
        let mut model = Model::default();

        for op in &ops {
            model.apply(&index, op);

            let expected = cost(&model.current) + model.previous_cost() + cost(&model.tombstones);
            prop_assert_eq!(index.ram_bytes_used(), expected, "after {:?}", op);
            prop_assert_eq!(
                index.ram_bytes_for_refresh(),
                cost(&model.current) + model.previous_cost()
            );
            prop_assert_eq!(index.reclaimable_refresh_bytes(), cost(&model.current));
            prop_assert_eq!(index.refreshing_bytes(), model.previous_cost());
            prop_assert_eq!(index.tombstone_ram_bytes(), cost(&model.tombstones));
        }

        for k in 0u8..24 {
            let id = key(k);
            let _lock = index.acquire_lock(&id);
            prop_assert_eq!(index.get_under_lock(&id), model.get(&id));
        }
        prop_assert_eq!(index.all_current(), model.current.clone());
        prop_assert_eq!(index.all_tombstones(), model.tombstones.clone());
        prop_assert_eq!(index.check_invariants(), Ok(()));
    }
}

#[test]
fn replacing_an_entry_charges_only_the_difference() {
    let index = LiveVersionIndex::new();
    index_live(&index, "doc", 1, 0);
    let live_cost = index.ram_bytes_used();

    delete(&index, "doc", 2, 1, 10);
    let tombstone_cost = index.ram_bytes_used();
    assert_eq!(
        tombstone_cost,
        entry_ram_bytes(&doc("doc"), &VersionEntry::tombstone(2, 1, 1, 10))
    );
    assert!(tombstone_cost > live_cost);

    index_live(&index, "doc", 3, 2);
    assert_eq!(index.ram_bytes_used(), live_cost);
}

#[test]
fn clear_zeroes_every_figure() {
    let index = LiveVersionIndex::new();
    for i in 0..50u64 {
        index_live(&index, &format!("doc{i}"), i + 1, i as i64);
    }
    index.before_refresh();
    for i in 0..10u64 {
        delete(&index, &format!("doc{i}"), i + 100, i as i64 + 100, 5);
    }

    index.clear();
    let stats = index.stats();
    assert_eq!(stats.ram_bytes_used, 0);
    assert_eq!(stats.tombstone_ram_bytes, 0);
    assert_eq!(stats.refreshing_bytes, 0);
    assert_eq!(stats.current_entries, 0);
}
