use sectors::{ArrayConfig, Registry, SectorsArray};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: i32,
    y: i32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Velocity {
    dx: i32,
    dy: i32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Health(i32);

#[test]
fn single_type_insert_and_iterate() {
    let registry = Registry::new();
    for i in 0..5 {
        let e = registry.take_entity();
        registry.add_component(e, Position { x: i, y: i * 10 });
    }

    let yielded: Vec<(u32, Position)> = registry
        .view::<&Position>()
        .map(|(id, p)| (id, *p))
        .collect();
    assert_eq!(yielded.len(), 5);
    for (i, (id, p)) in yielded.iter().enumerate() {
        assert_eq!(*id, i as u32);
        assert_eq!(*p, Position { x: i as i32, y: i as i32 * 10 });
    }
}

#[test]
fn add_component_overwrites_in_place() {
    let registry = Registry::new();
    let e = registry.take_entity();
    registry.add_component(e, Velocity { dx: 1, dy: 1 });
    registry.add_component(e, Velocity { dx: 2, dy: 2 });
    assert_eq!(registry.get_component::<Velocity>(e).unwrap().dx, 2);

    registry.destroy_component::<Velocity>(e);
    assert!(!registry.has_component::<Velocity>(e));
    registry.add_component(e, Velocity { dx: 3, dy: 3 });
    assert_eq!(registry.get_component::<Velocity>(e).unwrap().dx, 3);
}

#[test]
fn partial_intersection_views() {
    let registry = Registry::new();
    for i in 0..100 {
        let e = registry.take_entity();
        registry.add_component(e, Position { x: i, y: 0 });
        if i % 5 == 0 {
            registry.add_component(e, Velocity { dx: i, dy: i });
        }
    }

    let mut calls = 0;
    registry.view::<(&Position, &Velocity)>().each(|(id, p, v)| {
        assert_eq!(id % 5, 0);
        assert_eq!(p.x, v.dx);
        calls += 1;
    });
    assert_eq!(calls, 20);

    // The iterator form yields every Position, with the Velocity optional.
    let mut with = 0;
    let mut without = 0;
    for (_, _, v) in registry.view::<(&Position, &Velocity)>() {
        match v {
            Some(_) => with += 1,
            None => without += 1,
        }
    }
    assert_eq!(with, 20);
    assert_eq!(without, 80);
}

#[test]
fn destroy_then_defragment_keeps_survivors() {
    let registry = Registry::new();
    let ids: Vec<u32> = (0..6).map(|_| registry.take_entity()).collect();
    for &id in &ids[1..] {
        registry.add_component(id, Health(id as i32));
    }

    registry.destroy_entity(2);
    registry.destroy_entity(4);

    let alive: Vec<u32> = registry.view::<&Health>().map(|(id, _)| id).collect();
    assert_eq!(alive, vec![1, 3, 5]);
    assert_eq!(registry.entity_count(), 4);

    registry.defragment();
    let alive: Vec<u32> = registry.view::<&Health>().map(|(id, _)| id).collect();
    assert_eq!(alive, vec![1, 3, 5]);

    // Idempotent: a second pass changes nothing.
    registry.defragment();
    let alive: Vec<u32> = registry.view::<&Health>().map(|(id, _)| id).collect();
    assert_eq!(alive, vec![1, 3, 5]);
}

#[test]
fn grouped_layout_shares_one_slot() {
    let registry = Registry::new();
    registry.register_array::<(Position, Velocity)>(ArrayConfig::default());
    for i in 0..3 {
        let e = registry.take_entity();
        registry.add_component(e, Position { x: i, y: 0 });
        registry.add_component(e, Velocity { dx: -i, dy: 0 });
    }
    assert_eq!(registry.array_count(), 1);

    let stride = SectorsArray::new::<(Position, Velocity)>(ArrayConfig::default())
        .layout()
        .stride();
    let offsets: Vec<isize> = registry
        .view::<(&Position, &Velocity)>()
        .map(|(_, p, v)| {
            let v = v.expect("grouped member must be present");
            (v as *const Velocity as isize) - (p as *const Position as isize)
        })
        .collect();
    assert_eq!(offsets.len(), 3);
    // Same fixed in-slot distance for every entity, inside one stride.
    assert!(offsets.iter().all(|&d| d == offsets[0]));
    assert!(offsets[0] != 0 && (offsets[0].abs() as usize) < stride);
}

#[test]
fn ranged_views_trim_to_the_ranges() {
    let registry = Registry::new();
    for i in 0..10 {
        let e = registry.take_entity();
        registry.add_component(e, Health(i));
    }

    let seen: Vec<u32> = registry
        .view_ranged::<&Health>(&[2..5, 7..9])
        .map(|(id, _)| id)
        .collect();
    assert_eq!(seen, vec![2, 3, 4, 7, 8]);

    let empty = registry.view_ranged::<&Health>(&[20..30]);
    assert!(empty.is_empty());
    assert_eq!(empty.count(), 0);
}

#[test]
fn empty_views_iterate_zero_times() {
    let registry = Registry::new();

    // Type never registered.
    let view = registry.view::<&Position>();
    assert!(view.is_empty());
    assert_eq!(view.count(), 0);

    // Registered but empty.
    registry.register_array::<(Position,)>(ArrayConfig::default());
    let view = registry.view::<&Position>();
    assert!(view.is_empty());
    let mut calls = 0;
    registry.view::<&Position>().each(|_| calls += 1);
    assert_eq!(calls, 0);
}

#[test]
fn missing_secondary_types_resolve_to_none() {
    let registry = Registry::new();
    let e = registry.take_entity();
    registry.add_component(e, Position { x: 1, y: 1 });

    // Velocity is never registered anywhere.
    let items: Vec<(u32, bool)> = registry
        .view::<(&Position, &Velocity)>()
        .map(|(id, _, v)| (id, v.is_some()))
        .collect();
    assert_eq!(items, vec![(0, false)]);
}

#[test]
fn lookups_beyond_capacity_miss_quietly() {
    let registry = Registry::new();
    let e = registry.take_entity();
    registry.add_component(e, Health(1));

    assert!(registry.get_component::<Health>(9999).is_none());
    assert!(!registry.has_component::<Health>(9999));
    registry.destroy_component::<Health>(9999);
    registry.destroy_entity(9999);

    // Inserting at a far id auto-grows.
    registry.add_component(5000, Health(5));
    assert_eq!(registry.get_component::<Health>(5000).unwrap().0, 5);
    assert_eq!(registry.get_component::<Health>(0).unwrap().0, 1);
}

#[test]
fn get_component_mut_edits_in_place() {
    let mut registry = Registry::new();
    let e = registry.take_entity();
    registry.add_component(e, Health(10));
    registry.get_component_mut::<Health>(e).unwrap().0 = 42;
    assert_eq!(registry.get_component::<Health>(e).unwrap().0, 42);
    assert!(registry.get_component_mut::<Velocity>(e).is_none());
}

#[test]
fn batch_destruction_trims_and_sorts() {
    let registry = Registry::new();
    for i in 0..10 {
        let e = registry.take_entity();
        registry.add_component(e, Health(i));
    }
    // Unsorted, duplicated, and partially out of range.
    registry.destroy_entities(&[7, 3, 3, 9999, 1, 7]);
    registry.update(true);

    let left: Vec<u32> = registry.view::<&Health>().map(|(id, _)| id).collect();
    assert_eq!(left, vec![0, 2, 4, 5, 6, 8, 9]);
    assert_eq!(registry.entity_count(), 7);
}

#[test]
fn cleared_registry_keeps_registrations() {
    let registry = Registry::new();
    registry.register_array::<(Position, Velocity)>(ArrayConfig {
        capacity: 16,
        chunk_capacity: 8,
    });
    for _ in 0..4 {
        let e = registry.take_entity();
        registry.add_component(e, Position { x: 0, y: 0 });
    }
    registry.clear();
    assert_eq!(registry.entity_count(), 0);
    assert!(registry.view::<&Position>().is_empty());
    assert_eq!(registry.array_count(), 1);

    let e = registry.take_entity();
    assert_eq!(e, 0);
    registry.add_component(e, Position { x: 7, y: 7 });
    assert_eq!(registry.get_component::<Position>(e).unwrap().x, 7);
}

#[test]
#[should_panic]
fn partially_overlapping_registration_panics() {
    let registry = Registry::new();
    registry.register_array::<(Position, Velocity)>(ArrayConfig::default());
    registry.register_array::<(Velocity, Health)>(ArrayConfig::default());
}

#[test]
fn reregistering_the_same_group_is_a_no_op() {
    let registry = Registry::new();
    registry.register_array::<(Position, Velocity)>(ArrayConfig::default());
    registry.register_array::<(Position, Velocity)>(ArrayConfig::default());
    assert_eq!(registry.array_count(), 1);
}

#[test]
fn entity_ids_recycle_after_merge() {
    let registry = Registry::new();
    let ids: Vec<u32> = (0..5).map(|_| registry.take_entity()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    registry.destroy_entity(3);
    assert_eq!(registry.entity_count(), 4);
    assert!(!registry.contains(3));
    // The freed id sits right past the first range once 4 is also gone.
    registry.destroy_entity(4);
    assert_eq!(registry.take_entity(), 3);
    assert_eq!(registry.take_entity(), 4);
    assert_eq!(registry.entities(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn array_callback_iteration_matches_views() {
    let array = SectorsArray::new::<(Health,)>(ArrayConfig {
        capacity: 0,
        chunk_capacity: 4,
    });
    for id in 0..10u32 {
        array.insert(id, Health(id as i32));
    }
    array.erase_sector(4, false);

    let mut all = Vec::new();
    array.for_each_sector(|id, alive| all.push((id, alive)));
    assert_eq!(all.len(), 10);
    assert!(!all[4].1);

    let mut alive = Vec::new();
    array.for_each_alive::<Health>(|id, h| alive.push((id, h.0)));
    assert_eq!(alive.len(), 9);
    assert!(alive.iter().all(|&(id, v)| id as i32 == v && id != 4));

    let mut ranged = Vec::new();
    array.for_each_alive_in::<Health>(&[2..7], |id, _| ranged.push(id));
    assert_eq!(ranged, vec![2, 3, 5, 6]);

    let mut ranged_all = Vec::new();
    array.for_each_sector_in(&[2..7], |id, _| ranged_all.push(id));
    assert_eq!(ranged_all, vec![2, 3, 4, 5, 6]);
}

#[test]
fn grouped_each_gates_on_all_masks() {
    let registry = Registry::new();
    registry.register_array::<(Position, Velocity)>(ArrayConfig::default());
    for i in 0..4 {
        let e = registry.take_entity();
        registry.add_component(e, Position { x: i, y: 0 });
        if i < 2 {
            registry.add_component(e, Velocity { dx: i, dy: 0 });
        }
    }

    let mut pairs = 0;
    registry.view::<(&Position, &Velocity)>().each(|(_, p, v)| {
        assert_eq!(p.x, v.dx);
        pairs += 1;
    });
    assert_eq!(pairs, 2);

    let options: Vec<bool> = registry
        .view::<(&Position, &Velocity)>()
        .map(|(_, _, v)| v.is_some())
        .collect();
    assert_eq!(options, vec![true, true, false, false]);
}

#[test]
fn grouped_sector_without_the_head_member_is_skipped() {
    let registry = Registry::new();
    registry.register_array::<(Position, Velocity)>(ArrayConfig::default());
    for i in 0..3 {
        let e = registry.take_entity();
        registry.add_component(e, Position { x: i, y: 0 });
        registry.add_component(e, Velocity { dx: i, dy: 0 });
    }
    // This sector is alive through Velocity alone, so the array has no dead
    // holes; Position was never constructed in it.
    let e = registry.take_entity();
    registry.add_component(e, Velocity { dx: 9, dy: 9 });

    let mut seen = Vec::new();
    registry.view::<&Position>().each(|(id, p)| {
        assert_eq!(p.x, id as i32);
        seen.push(id);
    });
    assert_eq!(seen, vec![0, 1, 2]);

    let mut pairs = Vec::new();
    registry
        .view::<(&Position, &Velocity)>()
        .each(|(id, p, v)| {
            assert_eq!(p.x, v.dx);
            pairs.push(id);
        });
    assert_eq!(pairs, vec![0, 1, 2]);

    let iterated: Vec<u32> = registry.view::<&Position>().map(|(id, _)| id).collect();
    assert_eq!(iterated, vec![0, 1, 2]);

    // Driving the view by the other member sees the lone sector.
    let by_velocity: Vec<u32> = registry.view::<&Velocity>().map(|(id, _)| id).collect();
    assert_eq!(by_velocity, vec![0, 1, 2, 3]);
}

#[test]
fn ranged_views_skip_holes() {
    let registry = Registry::new();
    for i in 0..10 {
        let e = registry.take_entity();
        registry.add_component(e, Health(i));
    }
    registry.destroy_entity(3);

    let seen: Vec<u32> = registry
        .view_ranged::<&Health>(&[2..6])
        .map(|(id, _)| id)
        .collect();
    assert_eq!(seen, vec![2, 4, 5]);

    // A dirty array falls back to the gated `each` path.
    let mut calls = 0;
    registry.view::<&Health>().each(|(id, _)| {
        assert_ne!(id, 3);
        calls += 1;
    });
    assert_eq!(calls, 9);

    registry.defragment();
    let seen: Vec<u32> = registry
        .view_ranged::<&Health>(&[2..6])
        .map(|(id, _)| id)
        .collect();
    assert_eq!(seen, vec![2, 4, 5]);
}

#[test]
fn secondary_cursor_catches_up_over_sparse_ids() {
    let registry = Registry::new();
    for id in &[10u32, 20, 30, 40] {
        registry.add_component(*id, Position { x: *id as i32, y: 0 });
    }
    registry.add_component(20u32, Velocity { dx: 2, dy: 0 });
    registry.add_component(40u32, Velocity { dx: 4, dy: 0 });

    let items: Vec<(u32, Option<i32>)> = registry
        .view::<(&Position, &Velocity)>()
        .map(|(id, _, v)| (id, v.map(|v| v.dx)))
        .collect();
    assert_eq!(
        items,
        vec![(10, None), (20, Some(2)), (30, None), (40, Some(4))]
    );
}

#[test]
fn emplace_constructs_lazily() {
    let registry = Registry::new();
    let e = registry.take_entity();
    registry.emplace_component(e, || Health(9));
    assert_eq!(registry.get_component::<Health>(e).unwrap().0, 9);
}
