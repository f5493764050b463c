//! Assembled areas: derived ids, rings, envelopes and assembly statistics.
//!
//! Areas are not an OSM primitive. They get a derived id that keeps way and
//! relation origins apart: twice the original id for ways, twice plus one
//! for relations, sign preserved.

use std::fmt;
use std::mem;
use std::ops::AddAssign;

use crate::osm::{ItemType, Location, NodeRef, Tags};

/// Derive the area id for an object id of the given type.
pub fn object_id_to_area_id(id: i64, kind: ItemType) -> i64 {
    let mut area_id = id.abs() * 2;
    if kind == ItemType::Relation {
        area_id += 1;
    }
    if id < 0 {
        -area_id
    } else {
        area_id
    }
}

/// Recover the original object id from an area id.
pub fn area_id_to_object_id(id: i64) -> i64 {
    let object_id = id.abs() / 2;
    if id < 0 {
        -object_id
    } else {
        object_id
    }
}

/// Axis-aligned bounding box in raw fixed-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

impl Envelope {
    pub fn new() -> Envelope {
        Envelope {
            min_x: i32::MAX,
            min_y: i32::MAX,
            max_x: i32::MIN,
            max_y: i32::MIN,
        }
    }

    /// Grow the box to cover a location. Undefined locations are skipped.
    pub fn extend(&mut self, location: Location) {
        if !location.is_defined() {
            return;
        }
        let (x, y) = location.raw();
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn merge(&mut self, other: Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x
    }

    /// Whether `other` lies fully inside this box. Empty boxes contain
    /// nothing and are contained in nothing.
    pub fn contains(&self, other: &Envelope) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    pub fn bottom_left(&self) -> Location {
        Location::from_raw(self.min_x, self.min_y)
    }

    pub fn top_right(&self) -> Location {
        Location::from_raw(self.max_x, self.max_y)
    }
}

impl Default for Envelope {
    fn default() -> Envelope {
        Envelope::new()
    }
}

/// A closed sequence of node references.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    pub nodes: Vec<NodeRef>,
}

impl Ring {
    pub fn new(nodes: Vec<NodeRef>) -> Ring {
        Ring { nodes }
    }

    /// Whether first and last node share a location.
    pub fn is_closed(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) if self.nodes.len() > 1 => first.location == last.location,
            _ => false,
        }
    }

    pub fn envelope(&self) -> Envelope {
        let mut envelope = Envelope::new();
        for node in &self.nodes {
            envelope.extend(node.location);
        }
        envelope
    }
}

/// One outer ring with the holes punched into it.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaPolygon {
    pub outer: Ring,
    pub inners: Vec<Ring>,
}

/// A finished area: derived id, polygons and the originating tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub id: i64,
    pub polygons: Vec<AreaPolygon>,
    pub tags: Tags,
}

impl Area {
    /// Build an area for the object it came from; `kind` is the type of
    /// the originating object and fixes the derived id.
    pub fn new(orig_id: i64, kind: ItemType, tags: Tags, polygons: Vec<AreaPolygon>) -> Area {
        Area {
            id: object_id_to_area_id(orig_id, kind),
            polygons,
            tags,
        }
    }

    /// Whether this area came from a closed way rather than a relation.
    pub fn from_way(&self) -> bool {
        self.id.unsigned_abs() & 1 == 0
    }

    /// Id of the way or relation this area was assembled from.
    pub fn orig_id(&self) -> i64 {
        area_id_to_object_id(self.id)
    }

    /// Number of (outer, inner) rings.
    pub fn num_rings(&self) -> (usize, usize) {
        let inners = self.polygons.iter().map(|p| p.inners.len()).sum();
        (self.polygons.len(), inners)
    }

    /// An area with more than one outer ring.
    pub fn is_multipolygon(&self) -> bool {
        self.num_rings().0 > 1
    }

    /// Bounding box over all outer rings.
    pub fn envelope(&self) -> Envelope {
        let mut envelope = Envelope::new();
        for polygon in &self.polygons {
            envelope.merge(polygon.outer.envelope());
        }
        envelope
    }

    /// Rough in-memory footprint, used for output buffer accounting.
    pub fn approx_bytes(&self) -> usize {
        let nodes: usize = self
            .polygons
            .iter()
            .map(|p| {
                p.outer.nodes.len() + p.inners.iter().map(|r| r.nodes.len()).sum::<usize>()
            })
            .sum();
        let tags: usize = self
            .tags
            .iter()
            .map(|tag| tag.key.len() + tag.value.len() + 4)
            .sum();
        mem::size_of::<Area>() + nodes * mem::size_of::<NodeRef>() + tags
    }
}

#[derive(Debug, Default, Clone)]
pub struct AreaStats {
    pub num_areas_from_ways: usize,
    pub num_areas_from_relations: usize,
    pub num_outer_rings: usize,
    pub num_inner_rings: usize,
    pub num_invalid_locations: usize,
    pub num_unclosed_rings: usize,
    pub num_empty_areas: usize,
}

impl AddAssign for AreaStats {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.num_areas_from_ways += other.num_areas_from_ways;
        self.num_areas_from_relations += other.num_areas_from_relations;
        self.num_outer_rings += other.num_outer_rings;
        self.num_inner_rings += other.num_inner_rings;
        self.num_invalid_locations += other.num_invalid_locations;
        self.num_unclosed_rings += other.num_unclosed_rings;
        self.num_empty_areas += other.num_empty_areas;
    }
}

impl fmt::Display for AreaStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            r#"Assembled:
  areas from ways:      {}
  areas from relations: {}
  outer rings:          {}
  inner rings:          {}
Skipped:
  invalid locations:    {}
  unclosed rings:       {}
  empty areas:          {}"#,
            self.num_areas_from_ways,
            self.num_areas_from_relations,
            self.num_outer_rings,
            self.num_inner_rings,
            self.num_invalid_locations,
            self.num_unclosed_rings,
            self.num_empty_areas
        )
    }
}
