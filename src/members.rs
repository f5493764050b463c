//! Interest and value tables for relation member ways.
//!
//! Pass 1 appends one interest row per tracked way member. `prepare()`
//! sorts the rows by way id, so pass 2 can run a merge-join: incoming ways
//! arrive in ascending id order and a single cursor walks the table. Rows
//! whose way id falls below the cursor belong to members that never
//! arrived; they are skipped and their relations never complete.
//!
//! When a way matches, it is stashed once and every row of the run gets
//! the handle. Each row decrements its relation's pending count; a count
//! reaching zero triggers the completion callback and then tears the
//! relation and its rows down.

use log::debug;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::flat;
use crate::osm::{ItemType, Relation, Way};
use crate::relations::{RelationHandle, RelationsDatabase};
use crate::stash::{ItemHandle, ItemStash};

#[derive(Debug, Clone, Copy)]
struct MemberRow {
    way_id: i64,
    rel: RelationHandle,
    pos: u32,
    value: Option<ItemHandle>,
    removed: bool,
}

/// Member way registry, one row per (relation, member position).
#[derive(Debug, Default)]
pub struct MembersDatabase {
    rows: Vec<MemberRow>,
    cursor: usize,
    sorted: bool,
    touched: bool,
}

impl MembersDatabase {
    pub fn new() -> MembersDatabase {
        MembersDatabase::default()
    }

    /// Record that `rel` needs the way with `way_id` as its member at
    /// position `pos`, and raise the relation's pending count.
    pub fn track(
        &mut self,
        relations: &mut RelationsDatabase,
        rel: RelationHandle,
        way_id: i64,
        pos: u32,
    ) {
        assert!(!self.sorted, "track called after prepare");
        relations.increment_pending(rel);
        self.rows.push(MemberRow {
            way_id,
            rel,
            pos,
            value: None,
            removed: false,
        });
    }

    /// Sort the interest table by way id. One-shot, called between passes.
    ///
    /// Ties sort by relation slot and member position, so the table order
    /// is identical across runs on identical input.
    pub fn prepare(&mut self) -> Result<()> {
        if self.touched {
            return Err(Error::StateMisuse {
                op: "prepare",
                phase: "pass2",
            });
        }
        if self.sorted {
            return Err(Error::StateMisuse {
                op: "prepare",
                phase: "prepared",
            });
        }
        self.rows
            .par_sort_unstable_by_key(|row| (row.way_id, row.rel.index(), row.pos));
        self.sorted = true;
        debug!("prepared members database: {} interest rows", self.rows.len());
        Ok(())
    }

    /// Offer an incoming pass-2 way.
    ///
    /// A way nobody asked for is a no-op. Otherwise the way is stashed
    /// once and all interested relations are notified; each relation whose
    /// pending count reaches zero is handed to `on_complete` together with
    /// its member ways in member-position order, then removed.
    ///
    /// A non-fatal assembly problem must be absorbed inside `on_complete`;
    /// an error returned from it aborts the run.
    pub fn add<F>(
        &mut self,
        stash: &mut ItemStash,
        relations: &mut RelationsDatabase,
        way: &Way,
        mut on_complete: F,
    ) -> Result<()>
    where
        F: FnMut(&Relation, &[Way]) -> Result<()>,
    {
        assert!(self.sorted, "member way offered before prepare");
        self.touched = true;

        while self.cursor < self.rows.len() && self.rows[self.cursor].way_id < way.id {
            if !self.rows[self.cursor].removed {
                debug!("member way {} never arrived", self.rows[self.cursor].way_id);
            }
            self.cursor += 1;
        }
        if self.cursor >= self.rows.len() || self.rows[self.cursor].way_id != way.id {
            return Ok(());
        }

        let payload = flat::encode_way(way);
        let value = stash.add(&payload, ItemType::Way)?;

        let mut completed = Vec::new();
        while self.cursor < self.rows.len() && self.rows[self.cursor].way_id == way.id {
            let row = &mut self.rows[self.cursor];
            self.cursor += 1;
            if row.removed {
                continue;
            }
            row.value = Some(value);
            if relations.decrement_pending(row.rel) == 0 {
                completed.push(row.rel);
            }
        }

        for rel in completed {
            self.complete(stash, relations, rel, &mut on_complete)?;
        }
        Ok(())
    }

    /// Look up a stored member way.
    pub fn get(&self, stash: &ItemStash, way_id: i64) -> Option<Way> {
        let run = self.run(way_id);
        let value = self.rows[run]
            .iter()
            .find(|row| !row.removed)
            .and_then(|row| row.value)?;
        Some(flat::decode_way(stash.get(value)))
    }

    /// Tear down one interest row of a finished relation.
    ///
    /// The stashed way is freed when the last live row for its id goes.
    pub fn remove(&mut self, stash: &mut ItemStash, way_id: i64, rel: RelationHandle) {
        let run = self.run(way_id);
        let mut value = None;
        let mut removed_one = false;
        let mut live_left = false;
        for row in &mut self.rows[run] {
            if row.removed {
                continue;
            }
            if !removed_one && row.rel == rel {
                row.removed = true;
                removed_one = true;
                value = row.value.take();
                continue;
            }
            live_left = true;
        }
        assert!(removed_one, "no interest row for way {way_id}");
        if !live_left {
            if let Some(handle) = value {
                stash.remove(handle);
            }
        }
    }

    /// Number of live interest rows.
    pub fn count(&self) -> usize {
        self.rows.iter().filter(|row| !row.removed).count()
    }

    /// Bytes held by the interest table itself, for reporting.
    pub fn used_memory(&self) -> usize {
        self.rows.capacity() * std::mem::size_of::<MemberRow>()
    }

    fn complete<F>(
        &mut self,
        stash: &mut ItemStash,
        relations: &mut RelationsDatabase,
        rel: RelationHandle,
        on_complete: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&Relation, &[Way]) -> Result<()>,
    {
        let relation = relations.relation(stash, rel);
        let mut ways = Vec::new();
        for member in &relation.members {
            if member.kind != ItemType::Way || member.id == 0 {
                continue;
            }
            let way = self.get(stash, member.id).unwrap_or_else(|| {
                panic!(
                    "relation {} completed without member way {}",
                    relation.id, member.id
                )
            });
            ways.push(way);
        }

        on_complete(&relation, &ways)?;

        for member in &relation.members {
            if member.kind != ItemType::Way || member.id == 0 {
                continue;
            }
            self.remove(stash, member.id, rel);
        }
        relations.remove(stash, rel);
        Ok(())
    }

    // Contiguous row range for a way id. Only valid once sorted.
    fn run(&self, way_id: i64) -> std::ops::Range<usize> {
        debug_assert!(self.sorted);
        let start = self.rows.partition_point(|row| row.way_id < way_id);
        let len = self.rows[start..].partition_point(|row| row.way_id == way_id);
        start..start + len
    }

    #[cfg(test)]
    fn way_ids(&self) -> Vec<i64> {
        self.rows.iter().map(|row| row.way_id).collect()
    }
}
