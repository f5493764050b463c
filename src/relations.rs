//! Registry of the relations kept after pass 1.
//!
//! Each entry owns the stash handle of the relation payload, the count of
//! member ways still missing, and a caller-owned bits field. Entries hand
//! out generational handles so back-references from the members table stay
//! cheap to copy and safe against reuse.

use crate::error::Result;
use crate::flat;
use crate::osm::{ItemType, Relation};
use crate::stash::{ItemHandle, ItemStash};

/// Opaque stable reference to an entry in the relations database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationHandle {
    index: u32,
    gen: u32,
}

impl RelationHandle {
    /// Position of the entry, used as a deterministic sort tie-break.
    pub(crate) fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
struct Entry {
    item: ItemHandle,
    pending: u32,
    bits: u32,
    gen: u32,
    alive: bool,
}

/// Dense slot table over relation entries.
///
/// The payloads themselves live in the item stash; this table only holds
/// bookkeeping. Completed entries free their slot for reuse, with the
/// generation bumped so handles into the old entry are caught.
#[derive(Debug, Default)]
pub struct RelationsDatabase {
    entries: Vec<Entry>,
    free_entries: Vec<u32>,
}

impl RelationsDatabase {
    pub fn new() -> RelationsDatabase {
        RelationsDatabase::default()
    }

    /// Stash a relation and create its entry with a pending count of zero.
    ///
    /// The caller raises the pending count as it registers interest in the
    /// relation's members.
    pub fn add(&mut self, stash: &mut ItemStash, relation: &Relation) -> Result<RelationHandle> {
        let payload = flat::encode_relation(relation);
        let item = stash.add(&payload, ItemType::Relation)?;
        let index = match self.free_entries.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.item = item;
                entry.pending = 0;
                entry.bits = 0;
                entry.alive = true;
                index
            }
            None => {
                self.entries.push(Entry {
                    item,
                    pending: 0,
                    bits: 0,
                    gen: 0,
                    alive: true,
                });
                (self.entries.len() - 1) as u32
            }
        };
        Ok(RelationHandle {
            index,
            gen: self.entries[index as usize].gen,
        })
    }

    pub fn increment_pending(&mut self, handle: RelationHandle) {
        self.entry_mut(handle).pending += 1;
    }

    /// Lower the pending count by one and return the new value.
    ///
    /// A return of zero means the relation just became complete; acting on
    /// that is the caller's job. Panics if the count is already zero.
    pub fn decrement_pending(&mut self, handle: RelationHandle) -> u32 {
        let entry = self.entry_mut(handle);
        assert!(entry.pending > 0, "pending count underflow: {handle:?}");
        entry.pending -= 1;
        entry.pending
    }

    pub fn pending(&self, handle: RelationHandle) -> u32 {
        self.entry(handle).pending
    }

    /// Caller-owned bits stored alongside the entry. The manager keeps the
    /// number of tracked members here for teardown diagnostics.
    pub fn set_bits(&mut self, handle: RelationHandle, bits: u32) {
        self.entry_mut(handle).bits = bits;
    }

    pub fn bits(&self, handle: RelationHandle) -> u32 {
        self.entry(handle).bits
    }

    /// Borrow the encoded relation payload.
    pub fn payload<'a>(&self, stash: &'a ItemStash, handle: RelationHandle) -> &'a [u8] {
        stash.get(self.entry(handle).item)
    }

    /// Mutably borrow the encoded relation payload, for member-ref patches.
    pub fn payload_mut<'a>(
        &self,
        stash: &'a mut ItemStash,
        handle: RelationHandle,
    ) -> &'a mut [u8] {
        stash.get_mut(self.entry(handle).item)
    }

    /// Decode the relation behind a handle.
    pub fn relation(&self, stash: &ItemStash, handle: RelationHandle) -> Relation {
        flat::decode_relation(self.payload(stash, handle))
    }

    /// Drop an entry and free its stashed payload.
    pub fn remove(&mut self, stash: &mut ItemStash, handle: RelationHandle) {
        let item = self.entry(handle).item;
        stash.remove(item);
        let entry = &mut self.entries[handle.index as usize];
        entry.alive = false;
        entry.gen = entry.gen.wrapping_add(1);
        self.free_entries.push(handle.index);
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.entries.len() - self.free_entries.len()
    }

    /// Handles of all live entries, in insertion order.
    pub fn handles(&self) -> impl Iterator<Item = RelationHandle> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.alive)
            .map(|(index, entry)| RelationHandle {
                index: index as u32,
                gen: entry.gen,
            })
    }

    /// Bytes held by the entry table itself, for reporting.
    pub fn used_memory(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    fn entry(&self, handle: RelationHandle) -> &Entry {
        let entry = &self.entries[handle.index as usize];
        assert!(
            entry.alive && entry.gen == handle.gen,
            "stale relation handle: {handle:?}"
        );
        entry
    }

    fn entry_mut(&mut self, handle: RelationHandle) -> &mut Entry {
        let entry = &mut self.entries[handle.index as usize];
        assert!(
            entry.alive && entry.gen == handle.gen,
            "stale relation handle: {handle:?}"
        );
        entry
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osm::Member;

    fn water_relation() -> Relation {
        Relation {
            id: 3,
            members: vec![
                Member::new(ItemType::Way, 100, "outer"),
                Member::new(ItemType::Node, 7, "label"),
            ],
            tags: [("type", "multipolygon"), ("natural", "water")]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn pending_counts_down_to_completion() {
        let mut stash = ItemStash::new();
        let mut db = RelationsDatabase::new();
        let handle = db.add(&mut stash, &water_relation()).unwrap();
        assert_eq!(db.pending(handle), 0);

        db.increment_pending(handle);
        db.increment_pending(handle);
        assert_eq!(db.pending(handle), 2);

        assert_eq!(db.decrement_pending(handle), 1);
        assert_eq!(db.decrement_pending(handle), 0);
        assert_eq!(db.pending(handle), 0);
    }

    #[test]
    fn payload_patched_in_place() {
        let mut stash = ItemStash::new();
        let mut db = RelationsDatabase::new();
        let handle = db.add(&mut stash, &water_relation()).unwrap();

        flat::zero_member_ref(db.payload_mut(&mut stash, handle), 1);

        let relation = db.relation(&stash, handle);
        assert_eq!(relation.members[0].id, 100);
        assert_eq!(relation.members[1].id, 0);
        assert_eq!(relation.tags.value_of("natural"), Some("water"));
    }

    #[test]
    fn remove_frees_the_stash_slot() {
        let mut stash = ItemStash::new();
        let mut db = RelationsDatabase::new();
        let handle = db.add(&mut stash, &water_relation()).unwrap();
        assert_eq!(stash.count(), 1);
        assert_eq!(db.count(), 1);

        db.remove(&mut stash, handle);
        assert_eq!(stash.count(), 0);
        assert_eq!(db.count(), 0);
        assert_eq!(db.handles().count(), 0);
    }

    #[test]
    #[should_panic(expected = "stale relation handle")]
    fn reused_entry_rejects_old_handle() {
        let mut stash = ItemStash::new();
        let mut db = RelationsDatabase::new();
        let old = db.add(&mut stash, &water_relation()).unwrap();
        db.remove(&mut stash, old);
        let new = db.add(&mut stash, &water_relation()).unwrap();
        assert_eq!(db.pending(new), 0);
        db.pending(old);
    }

    #[test]
    fn bits_travel_with_the_entry() {
        let mut stash = ItemStash::new();
        let mut db = RelationsDatabase::new();
        let handle = db.add(&mut stash, &water_relation()).unwrap();
        db.set_bits(handle, 5);
        assert_eq!(db.bits(handle), 5);
    }
}
