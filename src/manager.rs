//! The multipolygon manager: a two-pass streaming orchestrator.
//!
//! Pass 1 classifies relations, stashes the kept ones and records interest
//! in their way members. `prepare()` sorts the interest table. Pass 2
//! captures member ways, completes relations the moment their last member
//! arrives, and separately assembles qualifying closed ways. Assembled
//! areas leave through the output buffer; memory for finished relations is
//! reclaimed on the spot.
//!
//! Both passes require input sorted by (type, id) with types in
//! nodes, ways, relations order; violations are fatal.

use std::fmt;

use log::{debug, info, log_enabled, Level};

use crate::area::{Area, AreaStats};
use crate::assembler::Assembler;
use crate::buffer::OutputBuffer;
use crate::error::{Error, Result};
use crate::filter::TagsFilter;
use crate::flat;
use crate::members::MembersDatabase;
use crate::osm::{ItemType, Object, Relation, Way};
use crate::relations::RelationsDatabase;
use crate::stash::ItemStash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pass1,
    Prepared,
    Pass2,
    Flushed,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Pass1 => "pass1",
            Phase::Prepared => "prepared",
            Phase::Pass2 => "pass2",
            Phase::Flushed => "flushed",
        }
    }
}

/// Tracks the (type, id) ordering contract within one pass.
#[derive(Debug, Default)]
struct CheckOrder {
    last_node: Option<i64>,
    last_way: Option<i64>,
    last_relation: Option<i64>,
}

impl CheckOrder {
    fn check(&mut self, kind: ItemType, id: i64) -> Result<()> {
        match kind {
            ItemType::Node => {
                if self.last_way.is_some() || self.last_relation.is_some() {
                    let after = if self.last_way.is_some() {
                        ItemType::Way
                    } else {
                        ItemType::Relation
                    };
                    return Err(Error::TypeOrder { kind, id, after });
                }
                Self::advance(&mut self.last_node, kind, id)
            }
            ItemType::Way => {
                if self.last_relation.is_some() {
                    return Err(Error::TypeOrder {
                        kind,
                        id,
                        after: ItemType::Relation,
                    });
                }
                Self::advance(&mut self.last_way, kind, id)
            }
            ItemType::Relation => Self::advance(&mut self.last_relation, kind, id),
            ItemType::Area => unreachable!("areas are not stream input"),
        }
    }

    // Ids must be strictly increasing; a repeat counts as out of order.
    fn advance(last: &mut Option<i64>, kind: ItemType, id: i64) -> Result<()> {
        if let Some(prev) = *last {
            if id <= prev {
                return Err(Error::OutOfOrder { kind, id, prev });
            }
        }
        *last = Some(id);
        Ok(())
    }

    fn reset(&mut self) {
        *self = CheckOrder::default();
    }
}

/// Memory breakdown of one manager instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUsage {
    pub stash: usize,
    pub relations_db: usize,
    pub members_db: usize,
}

impl MemoryUsage {
    pub fn total(&self) -> usize {
        self.stash + self.relations_db + self.members_db
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            r#"Used memory:
  item stash:   {}
  relations db: {}
  members db:   {}
  total:        {}"#,
            self.stash,
            self.relations_db,
            self.members_db,
            self.total()
        )
    }
}

/// Assembles areas from closed ways and multipolygon relations fed in two
/// sorted passes.
///
/// The assembler type decides what an "area" geometrically is; the manager
/// only coordinates. A fresh assembler is built from the frozen config for
/// every assembled object.
pub struct MultipolygonManager<A: Assembler> {
    config: A::Config,
    filter: TagsFilter,
    phase: Phase,
    order: CheckOrder,
    stash: ItemStash,
    relations: RelationsDatabase,
    members: MembersDatabase,
    output: OutputBuffer,
    stats: AreaStats,
}

impl<A: Assembler> MultipolygonManager<A> {
    pub fn new(config: A::Config, filter: TagsFilter) -> MultipolygonManager<A> {
        MultipolygonManager {
            config,
            filter,
            phase: Phase::Pass1,
            order: CheckOrder::default(),
            stash: ItemStash::new(),
            relations: RelationsDatabase::new(),
            members: MembersDatabase::new(),
            output: OutputBuffer::new(),
            stats: AreaStats::default(),
        }
    }

    /// Install the downstream sink receiving full output chunks.
    pub fn set_callback(&mut self, callback: impl FnMut(Vec<Area>) -> Result<()> + 'static) {
        self.output.set_callback(callback);
    }

    /// Flush threshold of the output buffer, in approximate bytes.
    pub fn set_flush_threshold(&mut self, bytes: usize) {
        self.output.set_threshold(bytes);
    }

    /// Cap the item stash payload bytes.
    pub fn set_stash_limit(&mut self, bytes: usize) {
        self.stash.set_limit(bytes);
    }

    /// Whether a relation is of interest: type `multipolygon` or
    /// `boundary`, tags matching the filter, and at least one way member.
    pub fn keep_relation(&self, relation: &Relation) -> bool {
        match relation.tags.value_of("type") {
            Some("multipolygon") | Some("boundary") => {}
            _ => return false,
        }
        self.filter.matches(&relation.tags)
            && relation.members.iter().any(|m| m.kind == ItemType::Way)
    }

    /// First-pass sink for a heterogeneous stream. Nodes and ways only get
    /// their order checked; relations go through classification.
    pub fn pass1_object(&mut self, object: &Object) -> Result<()> {
        self.enter_pass1("pass1_object")?;
        self.order.check(object.kind(), object.id())?;
        if let Object::Relation(relation) = object {
            self.relation_inner(relation)?;
        }
        Ok(())
    }

    /// First-pass sink for a relation-only stream.
    pub fn pass1_relation(&mut self, relation: &Relation) -> Result<()> {
        self.enter_pass1("pass1_relation")?;
        self.order.check(ItemType::Relation, relation.id)?;
        self.relation_inner(relation)
    }

    /// Sort the interest table and arm the second pass. One-shot.
    pub fn prepare(&mut self) -> Result<()> {
        if self.phase != Phase::Pass1 {
            return Err(Error::StateMisuse {
                op: "prepare",
                phase: self.phase.name(),
            });
        }
        self.members.prepare()?;
        self.order.reset();
        self.phase = Phase::Prepared;
        info!(
            "prepared for second pass: {} relations kept, {} way members tracked",
            self.relations.count(),
            self.members.count()
        );
        Ok(())
    }

    /// Second-pass sink for a heterogeneous stream. Only ways do anything;
    /// nodes and relations get their order checked and pass through.
    pub fn pass2_object(&mut self, object: &Object) -> Result<()> {
        self.enter_pass2("pass2_object")?;
        self.order.check(object.kind(), object.id())?;
        if let Object::Way(way) = object {
            self.way_inner(way)?;
        }
        Ok(())
    }

    /// Second-pass sink for a way-only stream.
    pub fn member_way(&mut self, way: &Way) -> Result<()> {
        self.enter_pass2("member_way")?;
        self.order.check(ItemType::Way, way.id)?;
        self.way_inner(way)
    }

    /// Finalise the output buffer through its callback. Residue after a
    /// callback-less run is taken with [`MultipolygonManager::read`].
    pub fn flush(&mut self) -> Result<()> {
        match self.phase {
            Phase::Prepared | Phase::Pass2 => {}
            phase => {
                return Err(Error::StateMisuse {
                    op: "flush",
                    phase: phase.name(),
                })
            }
        }
        self.phase = Phase::Flushed;
        if log_enabled!(Level::Debug) {
            for handle in self.relations.handles() {
                let relation = self.relations.relation(&self.stash, handle);
                debug!(
                    "relation {} incomplete: {} of {} tracked way members never arrived",
                    relation.id,
                    self.relations.pending(handle),
                    self.relations.bits(handle)
                );
            }
        }
        let incomplete = self.relations.count();
        if incomplete > 0 {
            info!("{incomplete} relations never completed");
        }
        self.output.flush()
    }

    /// Take the residual output buffer contents.
    pub fn read(&mut self) -> Vec<Area> {
        self.output.read()
    }

    /// Cumulative assembler statistics.
    pub fn stats(&self) -> &AreaStats {
        &self.stats
    }

    /// Memory breakdown across the stash and both databases.
    pub fn used_memory(&self) -> MemoryUsage {
        MemoryUsage {
            stash: self.stash.used_memory(),
            relations_db: self.relations.used_memory(),
            members_db: self.members.used_memory(),
        }
    }

    fn enter_pass1(&mut self, op: &'static str) -> Result<()> {
        if self.phase != Phase::Pass1 {
            return Err(Error::StateMisuse {
                op,
                phase: self.phase.name(),
            });
        }
        Ok(())
    }

    fn enter_pass2(&mut self, op: &'static str) -> Result<()> {
        match self.phase {
            Phase::Prepared => {
                self.phase = Phase::Pass2;
                Ok(())
            }
            Phase::Pass2 => Ok(()),
            phase => Err(Error::StateMisuse {
                op,
                phase: phase.name(),
            }),
        }
    }

    fn relation_inner(&mut self, relation: &Relation) -> Result<()> {
        if !self.keep_relation(relation) {
            return Ok(());
        }
        let handle = self.relations.add(&mut self.stash, relation)?;
        let mut tracked = 0u32;
        for (pos, member) in relation.members.iter().enumerate() {
            if member.kind == ItemType::Way {
                self.members
                    .track(&mut self.relations, handle, member.id, pos as u32);
                tracked += 1;
            } else {
                // Mark the member as not of interest in the stashed copy.
                flat::zero_member_ref(self.relations.payload_mut(&mut self.stash, handle), pos);
            }
        }
        self.relations.set_bits(handle, tracked);
        Ok(())
    }

    fn way_inner(&mut self, way: &Way) -> Result<()> {
        let config = &self.config;
        let stats = &mut self.stats;
        let output = &mut self.output;
        self.members.add(
            &mut self.stash,
            &mut self.relations,
            way,
            |relation, ways| {
                let mut assembler = A::new(config);
                match assembler.assemble_relation(relation, ways, output) {
                    Err(Error::InvalidLocation { id }) => {
                        debug!(
                            "skipped area for relation {}: invalid location in way {id}",
                            relation.id
                        );
                    }
                    other => other?,
                }
                *stats += assembler.stats();
                output.possibly_flush()
            },
        )?;
        self.assemble_way(way)
    }

    /// Assemble a standalone area from a closed way of interest.
    ///
    /// Ways with unresolved end locations are not areas and are dropped
    /// without an error; the drop is counted in the invalid-location stats.
    fn assemble_way(&mut self, way: &Way) -> Result<()> {
        if way.nodes.len() < 4 {
            return Ok(());
        }
        let first = way.nodes[0].location;
        let last = way.nodes[way.nodes.len() - 1].location;
        if !first.is_defined() || !last.is_defined() {
            self.stats.num_invalid_locations += 1;
            return Ok(());
        }
        if first != last {
            return Ok(());
        }
        if way.tags.value_of("area") == Some("no") {
            return Ok(());
        }
        if !self.filter.matches(&way.tags) {
            return Ok(());
        }

        let mut assembler = A::new(&self.config);
        match assembler.assemble_way(way, &mut self.output) {
            Err(Error::InvalidLocation { id }) => {
                debug!("skipped area for way {id}: invalid location");
            }
            other => other?,
        }
        self.stats += assembler.stats();
        self.output.possibly_flush()
    }
}
