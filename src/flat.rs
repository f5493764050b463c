//! Flat little-endian payloads for stashed ways and relations.
//!
//! Items parked in the stash between the two passes are stored as plain
//! byte strings. Node references and relation members use fixed-size rows
//! ahead of the variable-length string data, so a single member ref can be
//! patched in place without re-encoding the whole item.

use byteorder::{ByteOrder, LittleEndian};

use crate::osm::{ItemType, Location, Member, NodeRef, Relation, Tags, Way};

/// Way payload header: id (i64), node count (u32), tag count (u32).
pub const WAY_HEADER: usize = 16;
/// Node reference row: ref (i64), x (i32), y (i32).
pub const NODE_REF_SIZE: usize = 16;
/// Relation payload header: id (i64), member count (u32), tag count (u32).
pub const REL_HEADER: usize = 16;
/// Member row: ref (i64), item type (u8), role length (u16).
pub const MEMBER_SIZE: usize = 11;

/// Number of bytes [`encode_way`] produces for this way.
pub fn encoded_way_len(way: &Way) -> usize {
    WAY_HEADER + way.nodes.len() * NODE_REF_SIZE + tags_len(&way.tags)
}

/// Encode a way into its flat payload.
pub fn encode_way(way: &Way) -> Vec<u8> {
    let mut buf = vec![0u8; encoded_way_len(way)];
    LittleEndian::write_i64(&mut buf[0..8], way.id);
    LittleEndian::write_u32(&mut buf[8..12], way.nodes.len() as u32);
    LittleEndian::write_u32(&mut buf[12..16], way.tags.len() as u32);
    let mut offset = WAY_HEADER;
    for node in &way.nodes {
        let (x, y) = node.location.raw();
        LittleEndian::write_i64(&mut buf[offset..offset + 8], node.id);
        LittleEndian::write_i32(&mut buf[offset + 8..offset + 12], x);
        LittleEndian::write_i32(&mut buf[offset + 12..offset + 16], y);
        offset += NODE_REF_SIZE;
    }
    let offset = put_tags(&mut buf, offset, &way.tags);
    debug_assert_eq!(offset, buf.len());
    buf
}

/// Decode a way payload produced by [`encode_way`].
pub fn decode_way(bytes: &[u8]) -> Way {
    let id = LittleEndian::read_i64(&bytes[0..8]);
    let num_nodes = LittleEndian::read_u32(&bytes[8..12]) as usize;
    let num_tags = LittleEndian::read_u32(&bytes[12..16]) as usize;
    let mut offset = WAY_HEADER;
    let mut nodes = Vec::with_capacity(num_nodes);
    for _ in 0..num_nodes {
        let id = LittleEndian::read_i64(&bytes[offset..offset + 8]);
        let x = LittleEndian::read_i32(&bytes[offset + 8..offset + 12]);
        let y = LittleEndian::read_i32(&bytes[offset + 12..offset + 16]);
        nodes.push(NodeRef::new(id, Location::from_raw(x, y)));
        offset += NODE_REF_SIZE;
    }
    let (tags, end) = read_tags(bytes, offset, num_tags);
    debug_assert_eq!(end, bytes.len());
    Way { id, nodes, tags }
}

/// Number of bytes [`encode_relation`] produces for this relation.
pub fn encoded_relation_len(relation: &Relation) -> usize {
    let roles: usize = relation.members.iter().map(|m| m.role.len()).sum();
    REL_HEADER + relation.members.len() * MEMBER_SIZE + roles + tags_len(&relation.tags)
}

/// Encode a relation into its flat payload.
///
/// Member rows come first, then all role strings, then the tags. Roles are
/// limited to 64 KiB, far beyond anything in real data.
pub fn encode_relation(relation: &Relation) -> Vec<u8> {
    let mut buf = vec![0u8; encoded_relation_len(relation)];
    LittleEndian::write_i64(&mut buf[0..8], relation.id);
    LittleEndian::write_u32(&mut buf[8..12], relation.members.len() as u32);
    LittleEndian::write_u32(&mut buf[12..16], relation.tags.len() as u32);
    let mut offset = REL_HEADER;
    for member in &relation.members {
        assert!(member.role.len() <= u16::MAX as usize, "member role too long");
        LittleEndian::write_i64(&mut buf[offset..offset + 8], member.id);
        buf[offset + 8] = member.kind.to_u8();
        LittleEndian::write_u16(&mut buf[offset + 9..offset + 11], member.role.len() as u16);
        offset += MEMBER_SIZE;
    }
    for member in &relation.members {
        buf[offset..offset + member.role.len()].copy_from_slice(member.role.as_bytes());
        offset += member.role.len();
    }
    let offset = put_tags(&mut buf, offset, &relation.tags);
    debug_assert_eq!(offset, buf.len());
    buf
}

/// Decode a relation payload produced by [`encode_relation`].
pub fn decode_relation(bytes: &[u8]) -> Relation {
    let id = LittleEndian::read_i64(&bytes[0..8]);
    let num_members = LittleEndian::read_u32(&bytes[8..12]) as usize;
    let num_tags = LittleEndian::read_u32(&bytes[12..16]) as usize;
    let mut offset = REL_HEADER;
    let mut rows = Vec::with_capacity(num_members);
    for _ in 0..num_members {
        let id = LittleEndian::read_i64(&bytes[offset..offset + 8]);
        let kind = ItemType::from_u8(bytes[offset + 8]);
        let role_len = LittleEndian::read_u16(&bytes[offset + 9..offset + 11]) as usize;
        rows.push((id, kind, role_len));
        offset += MEMBER_SIZE;
    }
    let mut members = Vec::with_capacity(num_members);
    for (id, kind, role_len) in rows {
        let role = String::from_utf8_lossy(&bytes[offset..offset + role_len]).into_owned();
        members.push(Member { kind, id, role });
        offset += role_len;
    }
    let (tags, end) = read_tags(bytes, offset, num_tags);
    debug_assert_eq!(end, bytes.len());
    Relation { id, members, tags }
}

/// The ref of the member at `pos`, read straight from an encoded relation.
pub fn member_ref(bytes: &[u8], pos: usize) -> i64 {
    let offset = REL_HEADER + pos * MEMBER_SIZE;
    LittleEndian::read_i64(&bytes[offset..offset + 8])
}

/// Overwrite the ref of the member at `pos` with 0, in place.
///
/// A zeroed ref marks a member that is not tracked. Decoding keeps the
/// member with id 0 so member positions stay stable.
pub fn zero_member_ref(bytes: &mut [u8], pos: usize) {
    let offset = REL_HEADER + pos * MEMBER_SIZE;
    LittleEndian::write_i64(&mut bytes[offset..offset + 8], 0);
}

fn tags_len(tags: &Tags) -> usize {
    tags.iter()
        .map(|tag| 4 + tag.key.len() + tag.value.len())
        .sum()
}

fn put_tags(buf: &mut [u8], mut offset: usize, tags: &Tags) -> usize {
    for tag in tags.iter() {
        assert!(tag.key.len() <= u16::MAX as usize, "tag key too long");
        assert!(tag.value.len() <= u16::MAX as usize, "tag value too long");
        LittleEndian::write_u16(&mut buf[offset..offset + 2], tag.key.len() as u16);
        offset += 2;
        buf[offset..offset + tag.key.len()].copy_from_slice(tag.key.as_bytes());
        offset += tag.key.len();
        LittleEndian::write_u16(&mut buf[offset..offset + 2], tag.value.len() as u16);
        offset += 2;
        buf[offset..offset + tag.value.len()].copy_from_slice(tag.value.as_bytes());
        offset += tag.value.len();
    }
    offset
}

fn read_tags(bytes: &[u8], mut offset: usize, count: usize) -> (Tags, usize) {
    let mut tags = Tags::new();
    for _ in 0..count {
        let klen = LittleEndian::read_u16(&bytes[offset..offset + 2]) as usize;
        offset += 2;
        let key = String::from_utf8_lossy(&bytes[offset..offset + klen]).into_owned();
        offset += klen;
        let vlen = LittleEndian::read_u16(&bytes[offset..offset + 2]) as usize;
        offset += 2;
        let value = String::from_utf8_lossy(&bytes[offset..offset + vlen]).into_owned();
        offset += vlen;
        tags.insert(key, value);
    }
    (tags, offset)
}
