//! Turning ways into rings: the assembler contract and a reference
//! implementation.
//!
//! The manager drives an [`Assembler`] but has no opinion about geometry.
//! A fresh assembler is built per area from a frozen config, run once, and
//! asked for its statistics; nothing is shared between runs.
//!
//! [`RingAssembler`] glues way segments end to end into closed rings and
//! nests them into polygons by envelope containment. It aims for
//! real-world robustness over strict validity: segments may arrive in
//! either orientation, junk that cannot close a ring is dropped and
//! counted, not fatal.

use crate::area::{Area, AreaPolygon, AreaStats, Envelope, Ring};
use crate::buffer::OutputBuffer;
use crate::error::{Error, Result};
use crate::osm::{ItemType, NodeRef, Relation, Tags, Way};
use log::debug;

/// Contract between the manager and the geometry code.
///
/// Returning [`Error::InvalidLocation`] marks one lossy area; the manager
/// absorbs it and keeps streaming. Every other error is fatal and
/// propagates out of the pass.
pub trait Assembler {
    type Config: Clone + Default;

    fn new(config: &Self::Config) -> Self;

    /// Assemble a single closed way into an area.
    fn assemble_way(&mut self, way: &Way, out: &mut OutputBuffer) -> Result<()>;

    /// Assemble a relation from its materialised member ways, given in
    /// member-position order.
    fn assemble_relation(
        &mut self,
        relation: &Relation,
        ways: &[Way],
        out: &mut OutputBuffer,
    ) -> Result<()>;

    /// Statistics of the runs so far.
    fn stats(&self) -> AreaStats;
}

#[derive(Debug, Clone)]
pub struct RingAssemblerConfig {
    /// Emit an area without any rings when assembly fails, so downstream
    /// sees that the object existed.
    pub create_empty_areas: bool,
    /// Drop node references with undefined locations instead of failing
    /// the area.
    pub ignore_invalid_locations: bool,
    /// Keep the `type` tag on assembled areas instead of stripping it.
    pub keep_type_tag: bool,
}

impl Default for RingAssemblerConfig {
    fn default() -> RingAssemblerConfig {
        RingAssemblerConfig {
            create_empty_areas: true,
            ignore_invalid_locations: false,
            keep_type_tag: false,
        }
    }
}

#[derive(Debug)]
pub struct RingAssembler {
    config: RingAssemblerConfig,
    stats: AreaStats,
}

impl Assembler for RingAssembler {
    type Config = RingAssemblerConfig;

    fn new(config: &RingAssemblerConfig) -> RingAssembler {
        RingAssembler {
            config: config.clone(),
            stats: AreaStats::default(),
        }
    }

    fn assemble_way(&mut self, way: &Way, out: &mut OutputBuffer) -> Result<()> {
        let nodes = self.checked_nodes(way)?;
        let rings = self.glue_rings(vec![nodes]);
        let polygons = self.build_polygons(rings);
        self.finish(way.id, ItemType::Way, &way.tags, polygons, out);
        Ok(())
    }

    fn assemble_relation(
        &mut self,
        relation: &Relation,
        ways: &[Way],
        out: &mut OutputBuffer,
    ) -> Result<()> {
        let mut segments = Vec::with_capacity(ways.len());
        for way in ways {
            segments.push(self.checked_nodes(way)?);
        }
        let rings = self.glue_rings(segments);
        let polygons = self.build_polygons(rings);
        self.finish(relation.id, ItemType::Relation, &relation.tags, polygons, out);
        Ok(())
    }

    fn stats(&self) -> AreaStats {
        self.stats.clone()
    }
}

impl RingAssembler {
    fn checked_nodes(&mut self, way: &Way) -> Result<Vec<NodeRef>> {
        if way.nodes.iter().all(|n| n.location.is_defined()) {
            return Ok(way.nodes.clone());
        }
        if self.config.ignore_invalid_locations {
            Ok(way
                .nodes
                .iter()
                .filter(|n| n.location.is_defined())
                .copied()
                .collect())
        } else {
            self.stats.num_invalid_locations += 1;
            Err(Error::InvalidLocation { id: way.id })
        }
    }

    /// Glue open segments at shared endpoints into closed rings.
    ///
    /// Already-closed segments become rings directly. For the rest, a
    /// candidate ring grows by appending whichever segment starts or ends
    /// at its tail (reversing as needed). A stuck candidate is flipped
    /// once to try growing from the other end; if it still cannot close
    /// it is dropped and counted.
    fn glue_rings(&mut self, segments: Vec<Vec<NodeRef>>) -> Vec<Ring> {
        let mut rings = Vec::new();
        let mut open: Vec<Vec<NodeRef>> = Vec::new();
        for nodes in segments {
            if nodes.len() < 2 {
                self.stats.num_unclosed_rings += 1;
            } else if nodes[0].location == nodes[nodes.len() - 1].location {
                self.push_ring(&mut rings, nodes);
            } else {
                open.push(nodes);
            }
        }

        while let Some(mut current) = open.pop() {
            let mut reversed = false;
            loop {
                if current[0].location == current[current.len() - 1].location {
                    self.push_ring(&mut rings, current);
                    break;
                }
                let tail = current[current.len() - 1].location;
                if let Some(idx) = open.iter().position(|seg| seg[0].location == tail) {
                    let mut append = open.remove(idx);
                    current.extend(append.drain(1..));
                } else if let Some(idx) =
                    open.iter().position(|seg| seg[seg.len() - 1].location == tail)
                {
                    let mut append = open.remove(idx);
                    append.pop();
                    append.reverse();
                    current.extend(append);
                } else if !reversed {
                    reversed = true;
                    current.reverse();
                } else {
                    debug!(
                        "discarded unclosable segment of {} nodes (ends {:?}..{:?})",
                        current.len(),
                        current[0].location,
                        tail
                    );
                    self.stats.num_unclosed_rings += 1;
                    break;
                }
            }
        }
        rings
    }

    fn push_ring(&mut self, rings: &mut Vec<Ring>, nodes: Vec<NodeRef>) {
        // A closed ring is a triangle at minimum: three corners plus the
        // repeated first node.
        if nodes.len() >= 4 {
            rings.push(Ring::new(nodes));
        } else {
            self.stats.num_unclosed_rings += 1;
        }
    }

    /// Nest rings into polygons by envelope containment.
    ///
    /// Each ring's owner is the tightest ring strictly containing it.
    /// Rings at even nesting depth are outer rings; odd-depth rings become
    /// holes of their owner. Islands inside holes come out as separate
    /// outer rings.
    fn build_polygons(&mut self, rings: Vec<Ring>) -> Vec<AreaPolygon> {
        let envelopes: Vec<Envelope> = rings.iter().map(Ring::envelope).collect();
        let owner: Vec<Option<usize>> = (0..rings.len())
            .map(|i| {
                let mut best: Option<usize> = None;
                for j in 0..rings.len() {
                    if i == j || envelopes[j] == envelopes[i] || !envelopes[j].contains(&envelopes[i])
                    {
                        continue;
                    }
                    best = match best {
                        Some(b) if envelope_area(&envelopes[b]) <= envelope_area(&envelopes[j]) => {
                            Some(b)
                        }
                        _ => Some(j),
                    };
                }
                best
            })
            .collect();
        let depth = |mut i: usize| {
            let mut d = 0;
            while let Some(j) = owner[i] {
                d += 1;
                i = j;
            }
            d
        };

        let mut slots: Vec<Option<Ring>> = rings.into_iter().map(Some).collect();
        let mut polygon_index = vec![usize::MAX; slots.len()];
        let mut polygons: Vec<AreaPolygon> = Vec::new();
        for i in 0..slots.len() {
            if depth(i) % 2 == 0 {
                if let Some(outer) = slots[i].take() {
                    polygon_index[i] = polygons.len();
                    polygons.push(AreaPolygon {
                        outer,
                        inners: Vec::new(),
                    });
                }
            }
        }
        for i in 0..slots.len() {
            if let Some(ring) = slots[i].take() {
                match owner[i].map(|j| polygon_index[j]) {
                    Some(p) if p != usize::MAX => polygons[p].inners.push(ring),
                    _ => polygons.push(AreaPolygon {
                        outer: ring,
                        inners: Vec::new(),
                    }),
                }
            }
        }
        polygons
    }

    fn finish(
        &mut self,
        orig_id: i64,
        kind: ItemType,
        tags: &Tags,
        polygons: Vec<AreaPolygon>,
        out: &mut OutputBuffer,
    ) {
        if polygons.is_empty() {
            if self.config.create_empty_areas {
                self.stats.num_empty_areas += 1;
                out.push(Area::new(orig_id, kind, self.area_tags(tags), Vec::new()));
            }
            return;
        }
        self.stats.num_outer_rings += polygons.len();
        self.stats.num_inner_rings += polygons.iter().map(|p| p.inners.len()).sum::<usize>();
        match kind {
            ItemType::Way => self.stats.num_areas_from_ways += 1,
            _ => self.stats.num_areas_from_relations += 1,
        }
        out.push(Area::new(orig_id, kind, self.area_tags(tags), polygons));
    }

    fn area_tags(&self, tags: &Tags) -> Tags {
        if self.config.keep_type_tag {
            tags.clone()
        } else {
            tags.iter()
                .filter(|tag| tag.key != "type")
                .map(|tag| (tag.key.as_str(), tag.value.as_str()))
                .collect()
        }
    }
}

fn envelope_area(envelope: &Envelope) -> i64 {
    let (min_x, min_y) = envelope.bottom_left().raw();
    let (max_x, max_y) = envelope.top_right().raw();
    (i64::from(max_x) - i64::from(min_x)) * (i64::from(max_y) - i64::from(min_y))
}
