//! Value types for the OSM input stream: locations, tags, nodes, ways and
//! relations.
//!
//! These are the objects fed to the manager by whatever reader drives the
//! two passes. They carry resolved node locations; id and coordinate types
//! follow the usual OSM conventions (signed 64 bit ids, fixed-point
//! coordinates with 100 nanodegree resolution).

use std::fmt;

/// Scaling factor between degrees and the fixed-point coordinate unit.
pub const COORDINATE_PRECISION: f64 = 10_000_000.0;

/// The kind of an OSM object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Node,
    Way,
    Relation,
    Area,
}

impl ItemType {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ItemType::Node => 1,
            ItemType::Way => 2,
            ItemType::Relation => 3,
            ItemType::Area => 4,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> ItemType {
        match raw {
            1 => ItemType::Node,
            2 => ItemType::Way,
            3 => ItemType::Relation,
            4 => ItemType::Area,
            _ => panic!("invalid item type byte: {raw}"),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ItemType::Node => "node",
            ItemType::Way => "way",
            ItemType::Relation => "relation",
            ItemType::Area => "area",
        };
        f.write_str(name)
    }
}

/// A geographic position in fixed-point coordinates (1e-7 degree units).
///
/// Locations can be undefined, which is how a way reports node references
/// that were never resolved against the node store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    x: i32,
    y: i32,
}

const UNDEFINED_COORDINATE: i32 = i32::MAX;

impl Location {
    /// Create a location from coordinates in degrees.
    pub fn new(lon: f64, lat: f64) -> Location {
        Location {
            x: (lon * COORDINATE_PRECISION).round() as i32,
            y: (lat * COORDINATE_PRECISION).round() as i32,
        }
    }

    /// Create a location from raw fixed-point coordinates.
    pub fn from_raw(x: i32, y: i32) -> Location {
        Location { x, y }
    }

    /// The undefined location.
    pub fn undefined() -> Location {
        Location {
            x: UNDEFINED_COORDINATE,
            y: UNDEFINED_COORDINATE,
        }
    }

    pub fn is_defined(self) -> bool {
        self.x != UNDEFINED_COORDINATE || self.y != UNDEFINED_COORDINATE
    }

    pub fn lon(self) -> f64 {
        f64::from(self.x) / COORDINATE_PRECISION
    }

    pub fn lat(self) -> f64 {
        f64::from(self.y) / COORDINATE_PRECISION
    }

    /// Raw fixed-point coordinates as an (x, y) pair.
    pub fn raw(self) -> (i32, i32) {
        (self.x, self.y)
    }
}

impl Default for Location {
    fn default() -> Location {
        Location::undefined()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_defined() {
            write!(f, "({},{})", self.lon(), self.lat())
        } else {
            f.write_str("(undefined)")
        }
    }
}

/// A single key/value tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// An ordered list of tags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tags {
    entries: Vec<Tag>,
}

impl Tags {
    pub fn new() -> Tags {
        Tags::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Tag {
            key: key.into(),
            value: value.into(),
        });
    }

    /// The value of the first tag with the given key.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    /// Whether a tag with exactly this key and value is present.
    pub fn has(&self, key: &str, value: &str) -> bool {
        self.value_of(key) == Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Tags {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Tags {
        let mut tags = Tags::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

/// A standalone node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub location: Location,
    pub tags: Tags,
}

/// A node reference inside a way, carrying the resolved location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRef {
    pub id: i64,
    pub location: Location,
}

impl NodeRef {
    pub fn new(id: i64, location: Location) -> NodeRef {
        NodeRef { id, location }
    }
}

/// An ordered list of node references with tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub nodes: Vec<NodeRef>,
    pub tags: Tags,
}

impl Way {
    /// Whether the first and the last node reference have the same location.
    ///
    /// This is a pure coordinate comparison; undefined locations compare
    /// equal to each other like any other value.
    pub fn ends_have_same_location(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) if self.nodes.len() > 1 => {
                first.location == last.location
            }
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ends_have_same_location()
    }
}

/// One member reference of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub kind: ItemType,
    pub id: i64,
    pub role: String,
}

impl Member {
    pub fn new(kind: ItemType, id: i64, role: impl Into<String>) -> Member {
        Member {
            kind,
            id,
            role: role.into(),
        }
    }
}

/// A tagged, ordered list of typed member references.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
}

/// One object of a heterogeneous input stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Object {
    pub fn kind(&self) -> ItemType {
        match self {
            Object::Node(_) => ItemType::Node,
            Object::Way(_) => ItemType::Way,
            Object::Relation(_) => ItemType::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Object::Node(node) => node.id,
            Object::Way(way) => way.id,
            Object::Relation(relation) => relation.id,
        }
    }
}
