//! Property tests for the registry and slot allocator

use std::collections::{HashMap, HashSet};

use pinstore::{Allocation, Registry, ResourceEntry, ResourceId, SLOT_COUNT, Slot};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(u8),
    Remove(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0u8..16).prop_map(Op::Add), (0u8..16).prop_map(Op::Remove)]
}

/// Mirror of the router's add: reject tracked ids, allocate, insert
fn add(reg: &mut Registry, id: u8) -> Option<Slot> {
    let id = ResourceId::from(id as u64);
    if reg.contains(&id) {
        return None;
    }
    let Allocation::Free(slot) = reg.next_slot() else {
        return None;
    };
    reg.insert(ResourceEntry {
        resource_id: id,
        slot,
        title: String::new(),
        locator: String::new(),
        icon_ref: None,
    })
    .ok()?;
    Some(slot)
}

proptest! {
    #[test]
    fn prop_ids_and_slots_stay_unique(ops in proptest::collection::vec(op(), 0..64)) {
        let mut reg = Registry::new();
        for op in ops {
            match op {
                Op::Add(id) => { add(&mut reg, id); }
                Op::Remove(id) => { reg.remove(&ResourceId::from(id as u64)); }
            }
            let slots: Vec<Slot> = reg.ordered().map(|e| e.slot).collect();
            let unique: HashSet<Slot> = slots.iter().copied().collect();
            prop_assert_eq!(slots.len(), unique.len());
            prop_assert_eq!(slots.len(), reg.len());
            prop_assert!(reg.len() <= SLOT_COUNT);
        }
    }

    #[test]
    fn prop_remove_never_moves_other_entries(ops in proptest::collection::vec(op(), 0..64)) {
        let mut reg = Registry::new();
        for op in ops {
            let before: HashMap<ResourceId, Slot> =
                reg.ordered().map(|e| (e.resource_id.clone(), e.slot)).collect();
            match op {
                Op::Add(id) => { add(&mut reg, id); }
                Op::Remove(id) => { reg.remove(&ResourceId::from(id as u64)); }
            }
            for entry in reg.ordered() {
                if let Some(slot) = before.get(&entry.resource_id) {
                    prop_assert_eq!(*slot, entry.slot);
                }
            }
        }
    }

    #[test]
    fn prop_allocation_is_lowest_free(taken in proptest::collection::btree_set(0u8..10, 0..=10)) {
        let taken: std::collections::BTreeSet<Slot> = taken.into_iter().map(|d| Slot::new(d).unwrap()).collect();
        match pinstore::allocate(&taken) {
            Allocation::Free(slot) => {
                prop_assert!(!taken.contains(&slot));
                for earlier in Slot::all().take_while(|s| *s != slot) {
                    prop_assert!(taken.contains(&earlier));
                }
            }
            Allocation::Exhausted => prop_assert_eq!(taken.len(), SLOT_COUNT),
        }
    }

    #[test]
    fn prop_persisted_form_round_trips(ops in proptest::collection::vec(op(), 0..32)) {
        let mut reg = Registry::new();
        for op in ops {
            if let Op::Add(id) = op { add(&mut reg, id); }
        }
        let json = serde_json::to_string(&reg).unwrap();
        let back: Registry = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, reg);
    }
}
