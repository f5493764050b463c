//! Append-mostly byte arena for parking OSM objects between passes.
//!
//! Items are copied in as flat payloads and addressed through opaque
//! handles. Handles stay valid while the arena grows or compacts; slots
//! are indirection, payload bytes can move. Removing an item marks its
//! slot free and bumps the slot generation, so stale handles are caught
//! instead of silently reading unrelated bytes.

use std::mem;

use log::debug;

use crate::error::{Error, Result};
use crate::osm::ItemType;

/// Opaque stable reference to an item in the stash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemHandle {
    index: u32,
    gen: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    len: usize,
    kind: ItemType,
    gen: u32,
    free: bool,
}

/// Byte arena with slot indirection and freed-byte accounting.
///
/// Removed payloads accumulate as garbage inside the arena until at least
/// half of it is garbage, then an insert triggers in-place compaction.
#[derive(Debug)]
pub struct ItemStash {
    arena: Vec<u8>,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    freed: usize,
    limit: usize,
    compact_min: usize,
}

impl ItemStash {
    pub fn new() -> ItemStash {
        ItemStash {
            arena: Vec::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            freed: 0,
            limit: usize::MAX,
            compact_min: 1 << 20,
        }
    }

    /// Cap the live payload bytes; inserts beyond the cap fail with
    /// [`Error::OutOfMemory`].
    pub fn set_limit(&mut self, bytes: usize) {
        self.limit = bytes;
    }

    #[cfg(test)]
    fn set_compact_min(&mut self, bytes: usize) {
        self.compact_min = bytes;
    }

    /// Copy a payload into the stash and return its handle.
    pub fn add(&mut self, bytes: &[u8], kind: ItemType) -> Result<ItemHandle> {
        let live = self.arena.len() - self.freed;
        if live + bytes.len() > self.limit {
            return Err(Error::OutOfMemory {
                requested: bytes.len(),
                limit: self.limit,
            });
        }
        if self.freed >= self.compact_min && self.freed * 2 >= self.arena.len() {
            self.compact();
        }

        let offset = self.arena.len();
        self.arena.extend_from_slice(bytes);

        let index = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.offset = offset;
                slot.len = bytes.len();
                slot.kind = kind;
                slot.free = false;
                index
            }
            None => {
                self.slots.push(Slot {
                    offset,
                    len: bytes.len(),
                    kind,
                    gen: 0,
                    free: false,
                });
                (self.slots.len() - 1) as u32
            }
        };
        Ok(ItemHandle {
            index,
            gen: self.slots[index as usize].gen,
        })
    }

    /// Borrow the payload behind a handle.
    ///
    /// Panics if the item was removed; using a handle after `remove` is a
    /// programming error, not a runtime condition.
    pub fn get(&self, handle: ItemHandle) -> &[u8] {
        let slot = self.slot(handle);
        &self.arena[slot.offset..slot.offset + slot.len]
    }

    /// Mutably borrow the payload behind a handle, for in-place patches.
    pub fn get_mut(&mut self, handle: ItemHandle) -> &mut [u8] {
        let slot = *self.slot(handle);
        &mut self.arena[slot.offset..slot.offset + slot.len]
    }

    /// The item type recorded when the payload was added.
    pub fn kind(&self, handle: ItemHandle) -> ItemType {
        self.slot(handle).kind
    }

    /// Free the slot behind a handle. The handle and all its copies become
    /// invalid immediately; the bytes are reclaimed by a later compaction.
    pub fn remove(&mut self, handle: ItemHandle) {
        let slot = &mut self.slots[handle.index as usize];
        assert!(
            !slot.free && slot.gen == handle.gen,
            "stale item handle: {handle:?}"
        );
        slot.free = true;
        slot.gen = slot.gen.wrapping_add(1);
        self.freed += slot.len;
        self.free_slots.push(handle.index);
    }

    /// Number of live items.
    pub fn count(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    /// Live payload bytes plus the slot table, for reporting.
    pub fn used_memory(&self) -> usize {
        self.arena.len() - self.freed + self.slots.len() * mem::size_of::<Slot>()
    }

    fn slot(&self, handle: ItemHandle) -> &Slot {
        let slot = &self.slots[handle.index as usize];
        assert!(
            !slot.free && slot.gen == handle.gen,
            "stale item handle: {handle:?}"
        );
        slot
    }

    fn compact(&mut self) {
        let mut order: Vec<u32> = (0..self.slots.len() as u32)
            .filter(|&index| !self.slots[index as usize].free)
            .collect();
        order.sort_unstable_by_key(|&index| self.slots[index as usize].offset);

        let mut write = 0;
        for index in order {
            let Slot { offset, len, .. } = self.slots[index as usize];
            if offset != write {
                self.arena.copy_within(offset..offset + len, write);
            }
            self.slots[index as usize].offset = write;
            write += len;
        }
        debug!(
            "compacted item stash: {} -> {write} bytes, {} items",
            self.arena.len(),
            self.count()
        );
        self.arena.truncate(write);
        self.freed = 0;
    }
}

impl Default for ItemStash {
    fn default() -> ItemStash {
        ItemStash::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    #[test]
    fn add_get_remove() {
        let mut stash = ItemStash::new();
        let a = stash.add(b"alpha", ItemType::Way).unwrap();
        let b = stash.add(b"bravo", ItemType::Relation).unwrap();
        assert_eq!(stash.get(a), b"alpha");
        assert_eq!(stash.get(b), b"bravo");
        assert_eq!(stash.kind(b), ItemType::Relation);
        assert_eq!(stash.count(), 2);

        let before = stash.used_memory();
        stash.remove(a);
        assert_eq!(stash.count(), 1);
        assert!(stash.used_memory() < before);
        assert_eq!(stash.get(b), b"bravo");
    }

    #[test]
    fn handles_survive_growth() {
        let mut stash = ItemStash::new();
        let first = stash.add(b"first", ItemType::Way).unwrap();
        for i in 0..1000u32 {
            stash.add(&i.to_le_bytes(), ItemType::Way).unwrap();
        }
        assert_eq!(stash.get(first), b"first");
    }

    #[test]
    #[should_panic(expected = "stale item handle")]
    fn stale_handle_panics() {
        let mut stash = ItemStash::new();
        let handle = stash.add(b"gone", ItemType::Way).unwrap();
        stash.remove(handle);
        stash.get(handle);
    }

    #[test]
    #[should_panic(expected = "stale item handle")]
    fn reused_slot_rejects_old_handle() {
        let mut stash = ItemStash::new();
        let old = stash.add(b"old", ItemType::Way).unwrap();
        stash.remove(old);
        let new = stash.add(b"new", ItemType::Way).unwrap();
        assert_eq!(stash.get(new), b"new");
        stash.get(old);
    }

    #[test]
    fn budget_enforced() {
        let mut stash = ItemStash::new();
        stash.set_limit(8);
        let a = stash.add(b"1234", ItemType::Way).unwrap();
        match stash.add(b"123456", ItemType::Way) {
            Err(Error::OutOfMemory { requested, limit }) => {
                assert_eq!(requested, 6);
                assert_eq!(limit, 8);
            }
            other => panic!("expected OutOfMemory, got {other:?}"),
        }
        stash.remove(a);
        stash.add(b"123456", ItemType::Way).unwrap();
    }

    #[test]
    fn compaction_keeps_live_items() {
        let mut stash = ItemStash::new();
        stash.set_compact_min(8);
        let mut live = Vec::new();
        for i in 0..64u8 {
            let payload = [i; 16];
            let handle = stash.add(&payload, ItemType::Way).unwrap();
            if i % 2 == 0 {
                stash.remove(handle);
            } else {
                live.push((handle, payload));
            }
        }
        // Enough garbage accumulated that at least one insert compacted.
        for (handle, payload) in &live {
            assert_eq!(stash.get(*handle), payload);
        }
        assert_eq!(stash.count(), live.len());
    }

    proptest! {
        #[test]
        fn stash_matches_reference(
            ops in vec((vec(any::<u8>(), 0..64), any::<u16>()), 1..60)
        ) {
            let mut stash = ItemStash::new();
            stash.set_compact_min(32);
            let mut live: Vec<(ItemHandle, Vec<u8>)> = Vec::new();
            for (payload, select) in ops {
                if select % 3 == 0 && !live.is_empty() {
                    let victim = select as usize % live.len();
                    let (handle, _) = live.remove(victim);
                    stash.remove(handle);
                } else {
                    let handle = stash.add(&payload, ItemType::Way).unwrap();
                    live.push((handle, payload));
                }
                for (handle, expected) in &live {
                    prop_assert_eq!(stash.get(*handle), expected.as_slice());
                }
            }
            prop_assert_eq!(stash.count(), live.len());
        }
    }
}
