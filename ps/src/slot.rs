//! Slot keyspace and allocator
//!
//! Ten slots map onto the digit row of a keyboard. Digits 1-9 are handed out
//! first, in ascending order; `0` sits at the far end of the row and is the
//! tenth and last slot.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of addressable slots
pub const SLOT_COUNT: usize = 10;

/// Order in which free slots are handed out (also the display order)
pub const ALLOCATION_ORDER: [u8; SLOT_COUNT] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid slot {0}: slots are the digits 0-9")]
pub struct InvalidSlot(pub i64);

/// A single-digit registry position (0-9)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Slot(u8);

impl Slot {
    /// Create a slot from a digit, rejecting anything outside 0-9
    pub fn new(digit: u8) -> Result<Self, InvalidSlot> {
        if digit <= 9 {
            Ok(Self(digit))
        } else {
            Err(InvalidSlot(digit as i64))
        }
    }

    /// Map a pressed key to its slot ('1'..'9' and '0')
    pub fn from_key(key: char) -> Option<Self> {
        key.to_digit(10).map(|d| Self(d as u8))
    }

    pub fn digit(self) -> u8 {
        self.0
    }

    /// Position of this slot in allocation/display order (0 sorts last)
    pub fn rank(self) -> usize {
        if self.0 == 0 { 9 } else { (self.0 - 1) as usize }
    }

    /// Every slot in allocation order
    pub fn all() -> impl Iterator<Item = Slot> {
        ALLOCATION_ORDER.iter().map(|&d| Slot(d))
    }
}

impl TryFrom<u8> for Slot {
    type Error = InvalidSlot;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        slot.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of asking the allocator for a slot
///
/// `Exhausted` is a terminal answer: callers report that capacity was reached
/// instead of retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Free(Slot),
    Exhausted,
}

impl Allocation {
    pub fn slot(self) -> Option<Slot> {
        match self {
            Allocation::Free(slot) => Some(slot),
            Allocation::Exhausted => None,
        }
    }
}

/// Pick the lowest free slot: 1..9 ascending, then 0
pub fn allocate(existing: &BTreeSet<Slot>) -> Allocation {
    Slot::all()
        .find(|slot| !existing.contains(slot))
        .map(Allocation::Free)
        .unwrap_or(Allocation::Exhausted)
}

/// Return a slot to the free pool. Other slots are never touched.
pub fn release(slots: &mut BTreeSet<Slot>, slot: Slot) -> bool {
    slots.remove(&slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(digits: &[u8]) -> BTreeSet<Slot> {
        digits.iter().map(|&d| Slot::new(d).unwrap()).collect()
    }

    #[test]
    fn test_allocate_empty_returns_one() {
        assert_eq!(allocate(&BTreeSet::new()), Allocation::Free(Slot(1)));
    }

    #[test]
    fn test_allocate_sequence_is_one_to_nine_then_zero() {
        let mut taken = BTreeSet::new();
        let mut order = Vec::new();
        while let Allocation::Free(slot) = allocate(&taken) {
            order.push(slot.digit());
            taken.insert(slot);
        }
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0]);
        assert_eq!(allocate(&taken), Allocation::Exhausted);
    }

    #[test]
    fn test_allocate_fills_lowest_gap() {
        assert_eq!(allocate(&slots(&[1, 2, 4])), Allocation::Free(Slot(3)));
        assert_eq!(allocate(&slots(&[2, 3, 0])), Allocation::Free(Slot(1)));
    }

    #[test]
    fn test_allocate_zero_only_after_nine() {
        let taken = slots(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(allocate(&taken), Allocation::Free(Slot(9)));
        let taken = slots(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(allocate(&taken), Allocation::Free(Slot(0)));
    }

    #[test]
    fn test_exhausted_only_when_all_ten_taken() {
        let nine_with_zero = slots(&[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(allocate(&nine_with_zero), Allocation::Free(Slot(9)));
        let all = slots(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(allocate(&all), Allocation::Exhausted);
        assert_eq!(allocate(&all).slot(), None);
    }

    #[test]
    fn test_release_leaves_other_slots() {
        let mut taken = slots(&[1, 2, 3]);
        assert!(release(&mut taken, Slot(2)));
        assert_eq!(taken, slots(&[1, 3]));
        assert!(!release(&mut taken, Slot(2)));
        assert_eq!(allocate(&taken), Allocation::Free(Slot(2)));
    }

    #[test]
    fn test_slot_ordering_puts_zero_last() {
        let ordered: Vec<u8> = slots(&[0, 5, 1, 9]).into_iter().map(Slot::digit).collect();
        assert_eq!(ordered, vec![1, 5, 9, 0]);
    }

    #[test]
    fn test_slot_from_key() {
        assert_eq!(Slot::from_key('1'), Some(Slot(1)));
        assert_eq!(Slot::from_key('0'), Some(Slot(0)));
        assert_eq!(Slot::from_key('a'), None);
    }

    #[test]
    fn test_slot_rejects_out_of_range() {
        assert_eq!(Slot::new(10), Err(InvalidSlot(10)));
        assert!(serde_json::from_str::<Slot>("12").is_err());
        assert_eq!(serde_json::from_str::<Slot>("7").unwrap(), Slot(7));
    }
}
