//! End-to-end tests of the two-pass area assembly flow: sorted input in,
//! assembled areas out, either collected at the end or streamed through
//! the output callback.

use std::cell::RefCell;
use std::rc::Rc;

use itertools::Itertools;

use osmarea::osm::{ItemType, NodeRef};
use osmarea::{
    Area, Error, Location, Member, MultipolygonManager, Object, Relation, RingAssembler,
    RingAssemblerConfig, TagMatcher, TagsFilter, Way,
};

fn manager() -> MultipolygonManager<RingAssembler> {
    MultipolygonManager::new(RingAssemblerConfig::default(), TagsFilter::match_all())
}

/// A manager whose output callback appends into the returned collector.
fn collecting_manager(
    threshold: usize,
) -> (MultipolygonManager<RingAssembler>, Rc<RefCell<Vec<Area>>>) {
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&collected);
    let mut manager = manager();
    manager.set_flush_threshold(threshold);
    manager.set_callback(move |chunk| {
        sink.borrow_mut().extend(chunk);
        Ok(())
    });
    (manager, collected)
}

fn square(id: i64, origin: (f64, f64), size: f64, tags: &[(&str, &str)]) -> Way {
    let (x, y) = origin;
    let coords = [
        (x, y),
        (x + size, y),
        (x + size, y + size),
        (x, y + size),
        (x, y),
    ];
    Way {
        id,
        nodes: coords
            .iter()
            .enumerate()
            .map(|(i, &(lon, lat))| NodeRef::new(id * 10 + i as i64, Location::new(lon, lat)))
            .collect(),
        tags: tags.iter().copied().collect(),
    }
}

fn relation(id: i64, type_tag: &str, way_ids: &[i64]) -> Relation {
    Relation {
        id,
        members: way_ids
            .iter()
            .map(|&way_id| Member::new(ItemType::Way, way_id, "outer"))
            .collect(),
        tags: [("type", type_tag), ("natural", "water")].into_iter().collect(),
    }
}

#[test]
fn closed_way_becomes_an_area() {
    let mut mgr = manager();
    mgr.prepare().unwrap();
    mgr.pass2_object(&Object::Way(square(10, (0.0, 0.0), 1.0, &[("natural", "water")])))
        .unwrap();
    mgr.flush().unwrap();

    let areas = mgr.read();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].id, 20);
    assert!(areas[0].from_way());
    assert_eq!(areas[0].orig_id(), 10);
    assert_eq!(areas[0].num_rings(), (1, 0));
    assert_eq!(areas[0].tags.value_of("natural"), Some("water"));
    assert_eq!(mgr.stats().num_areas_from_ways, 1);
}

#[test]
fn open_and_short_ways_produce_nothing() {
    let mut mgr = manager();
    mgr.prepare().unwrap();

    let mut open = square(10, (0.0, 0.0), 1.0, &[("natural", "water")]);
    open.nodes.pop();
    mgr.member_way(&open).unwrap();

    let mut short = square(11, (0.0, 0.0), 1.0, &[("natural", "water")]);
    short.nodes.truncate(2);
    short.nodes.push(short.nodes[0]);
    mgr.member_way(&short).unwrap();

    mgr.flush().unwrap();
    assert!(mgr.read().is_empty());
    assert_eq!(mgr.stats().num_areas_from_ways, 0);
}

#[test]
fn way_areas_respect_filter_and_area_no() {
    let filter = TagsFilter::new().with(TagMatcher::new("natural", "water"));
    let mut mgr: MultipolygonManager<RingAssembler> =
        MultipolygonManager::new(RingAssemblerConfig::default(), filter);
    mgr.prepare().unwrap();

    mgr.member_way(&square(10, (0.0, 0.0), 1.0, &[("landuse", "forest")]))
        .unwrap();
    mgr.member_way(&square(11, (2.0, 0.0), 1.0, &[("natural", "water"), ("area", "no")]))
        .unwrap();
    mgr.member_way(&square(12, (4.0, 0.0), 1.0, &[("natural", "water")]))
        .unwrap();
    mgr.flush().unwrap();

    let areas = mgr.read();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].id, 24);
}

#[test]
fn multipolygon_relation_completes_into_an_area() {
    let mut mgr = manager();
    let rel = Relation {
        id: 3,
        members: vec![
            Member::new(ItemType::Way, 100, "outer"),
            Member::new(ItemType::Node, 5, "label"),
            Member::new(ItemType::Way, 101, "inner"),
        ],
        tags: [("type", "multipolygon"), ("natural", "water")]
            .into_iter()
            .collect(),
    };
    mgr.pass1_object(&Object::Relation(rel)).unwrap();
    mgr.prepare().unwrap();
    let before = mgr.used_memory();

    mgr.member_way(&square(100, (0.0, 0.0), 10.0, &[])).unwrap();
    mgr.member_way(&square(101, (2.0, 2.0), 2.0, &[])).unwrap();
    mgr.flush().unwrap();

    let areas = mgr.read();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].id, 7);
    assert!(!areas[0].from_way());
    assert_eq!(areas[0].orig_id(), 3);
    assert_eq!(areas[0].num_rings(), (1, 1));
    assert_eq!(areas[0].tags.value_of("natural"), Some("water"));
    assert_eq!(areas[0].tags.value_of("type"), None);
    assert_eq!(mgr.stats().num_areas_from_relations, 1);

    // The stashed relation and its member ways were reclaimed.
    assert!(mgr.used_memory().stash < before.stash);
}

#[test]
fn completion_fires_the_moment_the_last_member_arrives() {
    let (mut mgr, collected) = collecting_manager(1);
    mgr.pass1_relation(&relation(3, "multipolygon", &[100, 101]))
        .unwrap();
    mgr.prepare().unwrap();

    mgr.member_way(&square(100, (0.0, 0.0), 1.0, &[])).unwrap();
    assert!(collected.borrow().is_empty());

    mgr.member_way(&square(101, (5.0, 5.0), 1.0, &[])).unwrap();
    assert_eq!(collected.borrow().len(), 1);
    assert_eq!(collected.borrow()[0].id, 7);

    mgr.flush().unwrap();
    assert_eq!(collected.borrow().len(), 1);
    assert!(mgr.read().is_empty());
}

#[test]
fn shared_member_way_serves_every_relation() {
    let mut mgr = manager();
    mgr.pass1_relation(&relation(3, "multipolygon", &[100])).unwrap();
    mgr.pass1_relation(&relation(4, "multipolygon", &[100])).unwrap();
    mgr.prepare().unwrap();

    mgr.member_way(&square(100, (0.0, 0.0), 1.0, &[])).unwrap();
    mgr.flush().unwrap();

    let ids: Vec<i64> = mgr.read().iter().map(|a| a.id).sorted().collect();
    assert_eq!(ids, vec![7, 9]);
    assert_eq!(mgr.stats().num_areas_from_relations, 2);
}

#[test]
fn tagged_closed_member_way_is_also_its_own_area() {
    let mut mgr = manager();
    mgr.pass1_relation(&relation(3, "multipolygon", &[100])).unwrap();
    mgr.prepare().unwrap();

    mgr.member_way(&square(100, (0.0, 0.0), 1.0, &[("natural", "water")]))
        .unwrap();
    mgr.flush().unwrap();

    // Once standalone, once through the relation.
    let ids: Vec<i64> = mgr.read().iter().map(|a| a.id).sorted().collect();
    assert_eq!(ids, vec![7, 200]);
    assert_eq!(mgr.stats().num_areas_from_ways, 1);
    assert_eq!(mgr.stats().num_areas_from_relations, 1);
}

#[test]
fn dangling_member_leaves_silent_residue() {
    let mut mgr = manager();
    mgr.pass1_relation(&relation(9, "multipolygon", &[100, 200]))
        .unwrap();
    mgr.prepare().unwrap();

    mgr.member_way(&square(100, (0.0, 0.0), 1.0, &[])).unwrap();
    // Way 200 never arrives; the run still ends cleanly.
    mgr.flush().unwrap();

    assert!(mgr.read().is_empty());
    assert_eq!(mgr.stats().num_areas_from_relations, 0);
    assert!(mgr.used_memory().total() > 0);
}

#[test]
fn route_relations_cost_nothing() {
    let mut mgr = manager();
    mgr.pass1_relation(&relation(5, "route", &[100])).unwrap();
    mgr.prepare().unwrap();
    assert_eq!(mgr.used_memory().total(), 0);

    mgr.member_way(&square(100, (0.0, 0.0), 1.0, &[])).unwrap();
    mgr.flush().unwrap();
    assert!(mgr.read().is_empty());
}

#[test]
fn descending_second_pass_fails_before_output() {
    let (mut mgr, collected) = collecting_manager(1);
    mgr.pass1_relation(&relation(3, "multipolygon", &[101, 100]))
        .unwrap();
    mgr.prepare().unwrap();

    mgr.member_way(&square(101, (0.0, 0.0), 1.0, &[])).unwrap();
    match mgr.member_way(&square(100, (5.0, 5.0), 1.0, &[])) {
        Err(Error::OutOfOrder { kind, id, prev }) => {
            assert_eq!(kind, ItemType::Way);
            assert_eq!(id, 100);
            assert_eq!(prev, 101);
        }
        other => panic!("expected OutOfOrder, got {other:?}"),
    }

    mgr.flush().unwrap();
    assert!(collected.borrow().is_empty());
    assert!(mgr.read().is_empty());
}

#[test]
fn negative_ids_keep_their_sign() {
    let mut mgr = manager();
    mgr.prepare().unwrap();
    mgr.member_way(&square(-10, (0.0, 0.0), 1.0, &[("natural", "water")]))
        .unwrap();
    mgr.flush().unwrap();
    let areas = mgr.read();
    assert_eq!(areas[0].id, -20);
    assert_eq!(areas[0].orig_id(), -10);
    assert!(areas[0].from_way());

    let mut mgr = manager();
    mgr.pass1_relation(&relation(-3, "multipolygon", &[-100])).unwrap();
    mgr.prepare().unwrap();
    mgr.member_way(&square(-100, (0.0, 0.0), 1.0, &[])).unwrap();
    mgr.flush().unwrap();
    let areas = mgr.read();
    assert_eq!(areas[0].id, -7);
    assert_eq!(areas[0].orig_id(), -3);
    assert!(!areas[0].from_way());
}

#[test]
fn callback_receives_chunks_as_output_accumulates() {
    let (mut mgr, collected) = collecting_manager(1);
    mgr.prepare().unwrap();

    for id in 10..13 {
        mgr.member_way(&square(id, (0.0, 0.0), 1.0, &[("natural", "water")]))
            .unwrap();
    }
    // Everything already went through the callback during the pass.
    assert_eq!(collected.borrow().len(), 3);

    mgr.flush().unwrap();
    let ids: Vec<i64> = collected.borrow().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![20, 22, 24]);
    assert!(mgr.read().is_empty());
}

#[test]
fn invalid_locations_skip_the_area_not_the_run() {
    let mut mgr = manager();
    mgr.pass1_relation(&relation(3, "multipolygon", &[100, 101]))
        .unwrap();
    mgr.prepare().unwrap();

    let mut bad_way = square(10, (0.0, 0.0), 1.0, &[("natural", "water")]);
    bad_way.nodes[2] = NodeRef::new(999, Location::undefined());
    mgr.member_way(&bad_way).unwrap();

    mgr.member_way(&square(100, (0.0, 0.0), 1.0, &[])).unwrap();
    let mut bad_member = square(101, (5.0, 5.0), 1.0, &[]);
    bad_member.nodes[2] = NodeRef::new(998, Location::undefined());
    mgr.member_way(&bad_member).unwrap();

    mgr.member_way(&square(102, (8.0, 8.0), 1.0, &[("natural", "water")]))
        .unwrap();
    mgr.flush().unwrap();

    let areas = mgr.read();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].id, 204);
    assert_eq!(mgr.stats().num_invalid_locations, 2);
    assert_eq!(mgr.stats().num_areas_from_ways, 1);
    assert_eq!(mgr.stats().num_areas_from_relations, 0);
}

#[test]
fn invalid_locations_can_be_dropped_via_config() {
    let config = RingAssemblerConfig {
        ignore_invalid_locations: true,
        ..RingAssemblerConfig::default()
    };
    let mut mgr: MultipolygonManager<RingAssembler> =
        MultipolygonManager::new(config, TagsFilter::match_all());
    mgr.prepare().unwrap();

    let mut way = square(10, (0.0, 0.0), 1.0, &[("natural", "water")]);
    way.nodes.insert(2, NodeRef::new(999, Location::undefined()));
    mgr.member_way(&way).unwrap();
    mgr.flush().unwrap();

    let areas = mgr.read();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].num_rings(), (1, 0));
    assert_eq!(areas[0].polygons[0].outer.nodes.len(), 5);
    assert_eq!(mgr.stats().num_invalid_locations, 0);
}

#[test]
fn undefined_end_locations_are_dropped_but_counted() {
    let mut mgr = manager();
    mgr.prepare().unwrap();

    let mut way = square(10, (0.0, 0.0), 1.0, &[("natural", "water")]);
    way.nodes[0] = NodeRef::new(100, Location::undefined());
    way.nodes[4] = NodeRef::new(100, Location::undefined());
    mgr.member_way(&way).unwrap();
    mgr.flush().unwrap();

    assert!(mgr.read().is_empty());
    assert_eq!(mgr.stats().num_invalid_locations, 1);
    assert_eq!(mgr.stats().num_areas_from_ways, 0);
}

#[test]
fn nodes_and_ways_in_the_first_pass_change_nothing() {
    let run = |full_stream: bool| {
        let mut mgr = manager();
        if full_stream {
            let node = osmarea::osm::Node {
                id: 1,
                location: Location::new(0.0, 0.0),
                tags: Default::default(),
            };
            mgr.pass1_object(&Object::Node(node)).unwrap();
            mgr.pass1_object(&Object::Way(square(100, (0.0, 0.0), 10.0, &[])))
                .unwrap();
        }
        mgr.pass1_relation(&relation(3, "multipolygon", &[100, 101]))
            .unwrap();
        mgr.prepare().unwrap();
        mgr.member_way(&square(100, (0.0, 0.0), 10.0, &[])).unwrap();
        mgr.member_way(&square(101, (2.0, 2.0), 2.0, &[("natural", "water")]))
            .unwrap();
        mgr.flush().unwrap();
        mgr.read().iter().map(|a| a.id).sorted().collect::<Vec<i64>>()
    };
    assert_eq!(run(true), run(false));
}

#[test]
fn empty_run_flushes_cleanly() {
    let mut mgr = manager();
    mgr.prepare().unwrap();
    mgr.flush().unwrap();
    assert!(mgr.read().is_empty());
    assert_eq!(mgr.used_memory().total(), 0);
    assert!(mgr.stats().to_string().contains("Assembled"));
}
