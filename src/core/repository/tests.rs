use super::*;
use crate::arena::BucketArena;
use crate::directory::LocationTable;
use crate::error::ErrorClass;

/// Location table that also records hook traffic
#[derive(Default)]
struct Recorder {
    table: LocationTable,
    relocated: Vec<EntityHandle>,
    released: Vec<EntityHandle>,
}

impl EntityDirectory for Recorder {
    fn set_location(&mut self, entity: EntityHandle, location: SlotLocation) {
        self.table.set_location(entity, location);
    }

    fn released(&mut self, entity: EntityHandle) {
        self.table.released(entity);
        self.released.push(entity);
    }

    fn on_relocate(&mut self, entity: EntityHandle, location: SlotLocation, buckets: &mut BucketArena) {
        // The back-reference is already current when the hook runs
        assert_eq!(self.table.location(entity), Some(location));
        assert_eq!(buckets.get(location.bucket).unwrap().handle(location.slot), Some(entity));
        self.relocated.push(entity);
    }
}

fn e(raw: u64) -> EntityHandle {
    EntityHandle::new(raw).unwrap()
}

fn id_field() -> FieldDescriptor {
    FieldDescriptor::of::<u64>("global-id")
        .restrict(EntityKind::NODE, 0, &[])
        .restrict(EntityKind::NODE, 1, &[])
        .restrict(EntityKind::NODE, 2, &[])
}

fn fields() -> Vec<FieldDescriptor> {
    vec![id_field()]
}

/// Insert `raw` and stamp its id into field 0
fn insert(
    repo: &mut BucketRepository,
    dir: &mut Recorder,
    ordinals: &[CategoryOrdinal],
    raw: u64,
) -> SlotLocation {
    let loc = repo
        .insert_entity(EntityKind::NODE, ordinals, &fields(), e(raw), dir)
        .unwrap();
    // Families without the field carry no bytes for it
    let values = repo
        .bucket_mut(loc.bucket)
        .unwrap()
        .slot_values_mut::<u64>(0, loc.slot)
        .unwrap();
    if let Some(value) = values.first_mut() {
        *value = raw;
    }
    loc
}

/// Every stored entity's field still carries its own id, and the directory agrees
fn assert_consistent(repo: &BucketRepository, dir: &Recorder) {
    repo.validate().unwrap();
    let mut live = 0;
    for rank in 0..repo.kind_count() {
        for id in repo.buckets(EntityKind(rank as u32)).unwrap() {
            let bucket = repo.bucket(*id).unwrap();
            for slot in 0..bucket.size() {
                let entity = bucket.handle(slot).unwrap();
                assert_eq!(dir.table.location(entity), Some(SlotLocation::new(*id, slot)));
                let values = bucket.slot_values::<u64>(0, slot).unwrap();
                if !values.is_empty() {
                    assert_eq!(values, &[entity.get()]);
                }
                live += 1;
            }
        }
    }
    assert_eq!(live, dir.table.len());
}

#[test]
fn test_capacity_two_scenario() {
    let mut repo = BucketRepository::new(2, 4);
    let mut dir = Recorder::default();

    for raw in 1..=3 {
        insert(&mut repo, &mut dir, &[0], raw);
    }

    let list = repo.buckets(EntityKind::NODE).unwrap().to_vec();
    assert_eq!(list.len(), 2);
    assert_eq!(repo.bucket(list[0]).unwrap().size(), 2);
    assert_eq!(repo.bucket(list[1]).unwrap().size(), 1);
    assert_eq!(repo.bucket(list[1]).unwrap().key().family(), 1);
    assert_eq!(repo.family_last(list[0]).unwrap(), list[1]);
    assert_eq!(repo.bucket(list[1]).unwrap().first_in_family(), list[0]);

    // Remove the second bucket's sole entity
    let removed = repo
        .remove_entity(SlotLocation::new(list[1], 0), &mut dir)
        .unwrap();
    assert_eq!(removed, e(3));
    assert_eq!(repo.buckets(EntityKind::NODE).unwrap(), &list[..1]);
    assert!(!repo.arena().contains(list[1]));
    assert_eq!(repo.family_last(list[0]).unwrap(), list[0]);
    assert!(dir.relocated.is_empty());
    assert_eq!(dir.released, vec![e(3)]);
    assert_consistent(&repo, &dir);
}

#[test]
fn test_swap_remove_moves_family_tail() {
    let mut repo = BucketRepository::new(3, 1);
    let mut dir = Recorder::default();

    let locs: Vec<_> = (1..=7).map(|raw| insert(&mut repo, &mut dir, &[1], raw)).collect();
    assert_eq!(repo.buckets(EntityKind::NODE).unwrap().len(), 3);

    // Entity 2 lives in the first bucket; entity 7 is the family's tail
    repo.remove_entity(locs[1], &mut dir).unwrap();

    assert_eq!(dir.relocated, vec![e(7)]);
    assert_eq!(dir.table.location(e(7)), Some(locs[1]));
    assert_eq!(dir.table.location(e(2)), None);
    assert_eq!(repo.stats().live_entities, 6);

    // Tail bucket (entity 7 was alone) is gone
    assert_eq!(repo.buckets(EntityKind::NODE).unwrap().len(), 2);
    assert_consistent(&repo, &dir);
}

#[test]
fn test_removing_tail_entity_does_not_relocate() {
    let mut repo = BucketRepository::new(4, 1);
    let mut dir = Recorder::default();

    insert(&mut repo, &mut dir, &[0], 1);
    let tail = insert(&mut repo, &mut dir, &[0], 2);

    repo.remove_entity(tail, &mut dir).unwrap();
    assert!(dir.relocated.is_empty());
    assert_eq!(repo.bucket(tail.bucket).unwrap().size(), 1);
    // Vacated trailing slot is cleared
    assert!(repo.bucket(tail.bucket).unwrap().handle(1).is_none());
    assert!(repo
        .bucket(tail.bucket)
        .unwrap()
        .field_bytes(0, 1)
        .unwrap()
        .iter()
        .all(|&b| b == 0));
    assert_consistent(&repo, &dir);
}

#[test]
fn test_remove_last_entity_destroys_family() {
    let mut repo = BucketRepository::new(4, 1);
    let mut dir = Recorder::default();

    let loc = insert(&mut repo, &mut dir, &[2], 1);
    repo.remove_entity(loc, &mut dir).unwrap();

    assert!(repo.buckets(EntityKind::NODE).unwrap().is_empty());
    assert!(repo.arena().is_empty());
}

#[test]
fn test_remove_vacant_slot_rejected() {
    let mut repo = BucketRepository::new(4, 1);
    let mut dir = Recorder::default();

    let loc = insert(&mut repo, &mut dir, &[0], 1);
    let err = repo
        .remove_entity(SlotLocation::new(loc.bucket, 2), &mut dir)
        .unwrap_err();
    assert!(matches!(err, BucketError::SlotOutOfRange { .. }));
    assert_eq!(err.class(), ErrorClass::InvariantViolation);
}

#[test]
fn test_families_are_ordered_by_key() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();

    insert(&mut repo, &mut dir, &[1, 2], 1);
    insert(&mut repo, &mut dir, &[0], 2);
    insert(&mut repo, &mut dir, &[2], 3);
    insert(&mut repo, &mut dir, &[0], 4);
    insert(&mut repo, &mut dir, &[0], 5);
    insert(&mut repo, &mut dir, &[], 6);

    let keys: Vec<_> = repo
        .buckets(EntityKind::NODE)
        .unwrap()
        .iter()
        .map(|id| repo.bucket(*id).unwrap().key().clone())
        .collect();
    let rendered: Vec<_> = keys.iter().map(|k| k.to_string()).collect();
    assert_eq!(
        rendered,
        vec!["0[]#0", "0[0]#0", "0[0]#1", "0[2]#0", "0[1, 2]#0"]
    );
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(repo.stats().families, 4);
    assert_consistent(&repo, &dir);
}

#[test]
fn test_declare_reuses_last_bucket_with_room() {
    let mut repo = BucketRepository::new(4, 1);
    let a = repo.declare_bucket(EntityKind::NODE, &[3], &fields()).unwrap();
    // Still empty, yet handed out again
    assert!(repo.bucket(a).unwrap().is_empty());
    let b = repo.declare_bucket(EntityKind::NODE, &[3], &fields()).unwrap();
    assert_eq!(a, b);
    assert_eq!(repo.buckets(EntityKind::NODE).unwrap().len(), 1);
    repo.validate().unwrap();
}

#[test]
fn test_declare_rejects_unknown_kind() {
    let mut repo = BucketRepository::new(4, 2);
    let err = repo
        .declare_bucket(EntityKind::ELEMENT, &[0], &fields())
        .unwrap_err();
    assert!(matches!(err, BucketError::UnknownKind(EntityKind::ELEMENT)));
    assert!(repo.buckets(EntityKind(9)).is_err());
}

#[test]
fn test_declare_schema_conflict() {
    let mut repo = BucketRepository::new(4, 1);
    let field = FieldDescriptor::of::<f64>("F")
        .restrict(EntityKind::NODE, 1, &[3])
        .restrict(EntityKind::NODE, 2, &[3])
        .restrict(EntityKind::NODE, 3, &[4]);

    let err = repo
        .declare_bucket(EntityKind::NODE, &[1, 2, 3], &[field])
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::SchemaConflict);
    assert!(err.to_string().contains("'F'"));
    assert!(repo.buckets(EntityKind::NODE).unwrap().is_empty());
}

#[test]
fn test_family_layout_fixed_by_first_bucket() {
    let mut repo = BucketRepository::new(1, 1);
    let narrow = FieldDescriptor::of::<f32>("v").restrict(EntityKind::NODE, 0, &[2]);
    let wide = FieldDescriptor::of::<f32>("v").restrict(EntityKind::NODE, 0, &[5]);

    let first = repo.declare_bucket(EntityKind::NODE, &[0], &[narrow]).unwrap();
    repo.bucket_mut(first).unwrap().push(e(1)).unwrap();
    let second = repo.declare_bucket(EntityKind::NODE, &[0], &[wide]).unwrap();

    assert_ne!(first, second);
    let first_map = repo.bucket(first).unwrap().field_map().clone();
    let second_map = repo.bucket(second).unwrap().field_map().clone();
    assert!(Arc::ptr_eq(&first_map, &second_map));
    assert_eq!(second_map.field(0).unwrap().size, 8);
}

#[test]
fn test_destroy_requires_empty_last_bucket() {
    let mut repo = BucketRepository::new(1, 1);
    let mut dir = Recorder::default();

    let a = insert(&mut repo, &mut dir, &[0], 1).bucket;
    let b = insert(&mut repo, &mut dir, &[0], 2).bucket;

    assert!(matches!(
        repo.destroy_bucket(b),
        Err(BucketError::BucketNotEmpty { .. })
    ));

    // Force the head empty to show it is still not destroyable
    repo.bucket_mut(a).unwrap().decrement_size();
    assert!(matches!(
        repo.destroy_bucket(a),
        Err(BucketError::NotLastInFamily(_))
    ));
}

#[test]
fn test_destroy_rejects_empty_new_tail() {
    let mut repo = BucketRepository::new(1, 1);
    let mut dir = Recorder::default();

    let a = insert(&mut repo, &mut dir, &[0], 1).bucket;
    let b = repo.declare_bucket(EntityKind::NODE, &[0], &fields()).unwrap();
    repo.bucket_mut(a).unwrap().decrement_size();

    assert!(matches!(
        repo.destroy_bucket(b),
        Err(BucketError::EmptyFamilyTail(id)) if id == a
    ));
    // Nothing was unlinked
    assert_eq!(repo.buckets(EntityKind::NODE).unwrap(), &[a, b]);
}

#[test]
fn test_remove_skips_unused_declared_tail() {
    let mut repo = BucketRepository::new(1, 1);
    let mut dir = Recorder::default();

    let a = insert(&mut repo, &mut dir, &[0], 1);
    let spare = repo.declare_bucket(EntityKind::NODE, &[0], &fields()).unwrap();
    assert_eq!(repo.family_last(a.bucket).unwrap(), spare);

    repo.remove_entity(a, &mut dir).unwrap();
    assert!(repo.buckets(EntityKind::NODE).unwrap().is_empty());
}

#[test]
fn test_family_overflow() {
    let mut repo = BucketRepository::new(1, 1);
    let key = CategoryKey::new(EntityKind::NODE, &[0])
        .unwrap()
        .with_family(FamilySeq::MAX - 1);

    // Plant a full family tail at the maximum sequence
    let id = repo
        .arena
        .allocate(
            key,
            1,
            Arc::new(FieldMap::resolve(EntityKind::NODE, &[0], &[], 1).unwrap()),
        )
        .unwrap();
    repo.arena.get_mut(id).unwrap().push(e(1)).unwrap();
    repo.buckets[0].push(id);

    let err = repo.declare_bucket(EntityKind::NODE, &[0], &[]).unwrap_err();
    assert!(matches!(err, BucketError::FamilyOverflow { .. }));
    assert_eq!(err.class(), ErrorClass::InvariantViolation);
    repo.buckets[0].clear();
}

#[test]
fn test_nil_bucket_shared() {
    let mut repo = BucketRepository::new(4, 2);
    let nil = repo.nil_bucket().unwrap();
    assert_eq!(repo.nil_bucket().unwrap(), nil);

    let bucket = repo.bucket(nil).unwrap();
    assert_eq!(bucket.capacity(), 0);
    assert!(bucket.is_full());
    assert_eq!(bucket.kind(), EntityKind::NIL);
    for rank in 0..2 {
        assert!(repo.buckets(EntityKind(rank)).unwrap().is_empty());
    }
    assert!(matches!(
        repo.destroy_bucket(nil),
        Err(BucketError::UnknownKind(EntityKind::NIL))
    ));
}

#[test]
fn test_move_entity_between_families() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();

    for raw in 1..=4 {
        insert(&mut repo, &mut dir, &[0], raw);
    }
    let from = dir.table.location(e(1)).unwrap();

    let to = repo.move_entity(from, &[0, 1], &fields(), &mut dir).unwrap();

    assert_eq!(dir.table.location(e(1)), Some(to));
    assert_eq!(repo.bucket(to.bucket).unwrap().key().ordinals(), &[0, 1]);
    assert_eq!(repo.bucket(to.bucket).unwrap().slot_values::<u64>(0, to.slot).unwrap(), &[1]);
    // Entity 4 filled the hole and both moves were reported
    assert_eq!(dir.relocated, vec![e(1), e(4)]);
    assert!(dir.released.is_empty());
    assert_consistent(&repo, &dir);
}

#[test]
fn test_move_entity_same_family_is_noop() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();

    let loc = insert(&mut repo, &mut dir, &[0], 1);
    assert_eq!(repo.move_entity(loc, &[0], &fields(), &mut dir).unwrap(), loc);
    assert!(dir.relocated.is_empty());
}

#[test]
fn test_validate_detects_unpacked_family() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();

    for raw in 1..=3 {
        insert(&mut repo, &mut dir, &[0], raw);
    }
    let head = repo.buckets(EntityKind::NODE).unwrap()[0];
    repo.bucket_mut(head).unwrap().decrement_size();

    assert!(matches!(repo.validate(), Err(BucketError::MalformedFamily(_))));
}

#[test]
fn test_stats() {
    let mut repo = BucketRepository::new(2, 2);
    let mut dir = Recorder::default();

    for raw in 1..=5 {
        insert(&mut repo, &mut dir, &[0], raw);
    }
    insert(&mut repo, &mut dir, &[1], 6);

    let stats = repo.stats();
    assert_eq!(stats.kinds, 2);
    assert_eq!(stats.buckets, 4);
    assert_eq!(stats.families, 2);
    assert_eq!(stats.live_entities, 6);
    assert_eq!(stats.allocated_slots, 8);
    assert!(stats.allocated_bytes > 0);
}

#[test]
fn test_family_listing() {
    let mut repo = BucketRepository::new(1, 1);
    let mut dir = Recorder::default();

    insert(&mut repo, &mut dir, &[0], 1);
    let a = insert(&mut repo, &mut dir, &[1], 2).bucket;
    let b = insert(&mut repo, &mut dir, &[1], 3).bucket;
    insert(&mut repo, &mut dir, &[2], 4);

    assert_eq!(repo.family(b).unwrap(), &[a, b]);
    assert_eq!(repo.family(a).unwrap(), &[a, b]);
}

// ---- resort ----

fn by_id(a: &EntityHandle, b: &EntityHandle) -> std::cmp::Ordering {
    a.cmp(b)
}

fn storage_order(repo: &BucketRepository, kind: EntityKind) -> Vec<Vec<u64>> {
    repo.buckets(kind)
        .unwrap()
        .iter()
        .map(|id| repo.bucket(*id).unwrap().handles().map(EntityHandle::get).collect())
        .collect()
}

#[test]
fn test_resort_orders_family() {
    let mut repo = BucketRepository::new(3, 1);
    let mut dir = Recorder::default();

    for raw in [5, 2, 8, 1, 7] {
        insert(&mut repo, &mut dir, &[0], raw);
    }

    let summary = repo.resort_families(by_id, &mut dir).unwrap();
    assert_eq!(storage_order(&repo, EntityKind::NODE), vec![vec![1, 2, 5], vec![7, 8]]);
    assert_eq!(summary.families, 1);
    assert_eq!(summary.families_changed, 1);
    assert_eq!(summary.scratch_buckets, 0);
    assert!(summary.moves > 0);
    assert_consistent(&repo, &dir);
}

#[test]
fn test_resort_full_family_uses_scratch() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();

    for raw in [4, 3, 2, 1] {
        insert(&mut repo, &mut dir, &[0], raw);
    }
    let before = repo.buckets(EntityKind::NODE).unwrap().to_vec();

    let summary = repo.resort_families(by_id, &mut dir).unwrap();
    assert_eq!(summary.scratch_buckets, 1);
    assert_eq!(storage_order(&repo, EntityKind::NODE), vec![vec![1, 2], vec![3, 4]]);
    // Scratch bucket is gone again
    assert_eq!(repo.buckets(EntityKind::NODE).unwrap(), &before[..]);
    assert_consistent(&repo, &dir);
}

#[test]
fn test_resort_is_idempotent() {
    let mut repo = BucketRepository::new(4, 2);
    let mut dir = Recorder::default();

    for raw in [9, 3, 11, 6, 1, 14, 2, 8, 5] {
        insert(&mut repo, &mut dir, &[0], raw);
    }
    for raw in [30, 20, 10] {
        insert(&mut repo, &mut dir, &[1, 2], raw);
    }

    repo.resort_families(by_id, &mut dir).unwrap();
    let first_pass = storage_order(&repo, EntityKind::NODE);
    dir.relocated.clear();

    let summary = repo.resort_families(by_id, &mut dir).unwrap();
    assert_eq!(storage_order(&repo, EntityKind::NODE), first_pass);
    assert_eq!(summary.moves, 0);
    assert_eq!(summary.families_changed, 0);
    assert!(dir.relocated.is_empty());
    assert_consistent(&repo, &dir);
}

#[test]
fn test_resort_propagates_after_first_mismatch() {
    let mut repo = BucketRepository::new(8, 1);
    let mut dir = Recorder::default();

    // 1 and 2 already in place, 4 and 3 swapped, 5 in place
    for raw in [1, 2, 4, 3, 5] {
        insert(&mut repo, &mut dir, &[0], raw);
    }

    repo.resort_families(by_id, &mut dir).unwrap();
    assert_eq!(storage_order(&repo, EntityKind::NODE), vec![vec![1, 2, 3, 4, 5]]);

    // Nothing reported before the first mismatch; every slot after it is
    assert!(!dir.relocated.contains(&e(1)));
    assert!(!dir.relocated.contains(&e(2)));
    assert!(dir.relocated.contains(&e(3)));
    assert!(dir.relocated.contains(&e(4)));
    assert!(dir.relocated.contains(&e(5)));
    assert_consistent(&repo, &dir);
}

#[test]
fn test_resort_custom_order() {
    let mut repo = BucketRepository::new(4, 1);
    let mut dir = Recorder::default();

    for raw in 1..=6 {
        insert(&mut repo, &mut dir, &[0], raw);
    }

    repo.resort_families(|a, b| b.cmp(a), &mut dir).unwrap();
    assert_eq!(storage_order(&repo, EntityKind::NODE), vec![vec![6, 5, 4, 3], vec![2, 1]]);
    assert_consistent(&repo, &dir);
}

#[test]
fn test_resort_empty_repository() {
    let mut repo = BucketRepository::new(4, 3);
    let mut dir = Recorder::default();
    let summary = repo.resort_families(by_id, &mut dir).unwrap();
    assert_eq!(summary, ResortSummary::default());
}

/// Node fields: a two-state f64 on part 0 and the single-state id field
fn state_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::of::<f64>("temperature")
            .with_states(2)
            .restrict(EntityKind::NODE, 0, &[]),
        id_field(),
    ]
}

#[test]
fn test_update_field_data_states_rotates_each_family() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();

    for raw in 1..=3u64 {
        let loc = repo
            .insert_entity(EntityKind::NODE, &[0], &state_fields(), e(raw), &mut dir)
            .unwrap();
        let bucket = repo.bucket_mut(loc.bucket).unwrap();
        bucket.state_values_mut::<f64>(0, 0, loc.slot).unwrap()[0] = raw as f64;
        bucket.state_values_mut::<f64>(0, 1, loc.slot).unwrap()[0] = -(raw as f64);
    }
    // Single-state family next to it
    repo.insert_entity(EntityKind::NODE, &[1], &state_fields(), e(4), &mut dir)
        .unwrap();
    let single = dir.table.location(e(4)).unwrap().bucket;
    let single_map = Arc::clone(repo.bucket(single).unwrap().field_map());

    assert_eq!(repo.update_field_data_states().unwrap(), 2);
    repo.validate().unwrap();

    for raw in 1..=3u64 {
        let loc = dir.table.location(e(raw)).unwrap();
        let bucket = repo.bucket(loc.bucket).unwrap();
        assert_eq!(bucket.state_values::<f64>(0, 1, loc.slot).unwrap(), &[raw as f64]);
        assert_eq!(bucket.state_values::<f64>(0, 0, loc.slot).unwrap(), &[-(raw as f64)]);
    }

    // The whole family shares one rotated layout
    let list = repo.buckets(EntityKind::NODE).unwrap().to_vec();
    let family: Vec<_> = list.iter().filter(|id| **id != single).collect();
    assert_eq!(family.len(), 2);
    assert!(Arc::ptr_eq(
        repo.bucket(*family[0]).unwrap().field_map(),
        repo.bucket(*family[1]).unwrap().field_map()
    ));
    assert!(Arc::ptr_eq(repo.bucket(single).unwrap().field_map(), &single_map));
    assert!(dir.relocated.is_empty());
}

#[test]
fn test_rotated_states_survive_swap_remove() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();

    for raw in 1..=3u64 {
        let loc = repo
            .insert_entity(EntityKind::NODE, &[0], &state_fields(), e(raw), &mut dir)
            .unwrap();
        let bucket = repo.bucket_mut(loc.bucket).unwrap();
        bucket.state_values_mut::<f64>(0, 0, loc.slot).unwrap()[0] = raw as f64;
    }
    repo.update_field_data_states().unwrap();

    // New bucket declared after rotation inherits the rotated layout
    let loc = repo
        .insert_entity(EntityKind::NODE, &[0], &state_fields(), e(4), &mut dir)
        .unwrap();
    repo.bucket_mut(loc.bucket)
        .unwrap()
        .state_values_mut::<f64>(0, 1, loc.slot)
        .unwrap()[0] = 4.0;

    let first = dir.table.location(e(1)).unwrap();
    repo.remove_entity(first, &mut dir).unwrap();

    for raw in 2..=4u64 {
        let loc = dir.table.location(e(raw)).unwrap();
        let values = repo
            .bucket(loc.bucket)
            .unwrap()
            .state_values::<f64>(0, 1, loc.slot)
            .unwrap();
        assert_eq!(values, &[raw as f64]);
    }
    repo.validate().unwrap();
}

#[test]
fn test_update_field_data_states_without_multi_state_fields() {
    let mut repo = BucketRepository::new(2, 1);
    let mut dir = Recorder::default();
    for raw in 1..=3 {
        insert(&mut repo, &mut dir, &[0], raw);
    }
    assert_eq!(repo.update_field_data_states().unwrap(), 0);
    assert_consistent(&repo, &dir);
}

#[test]
fn test_unallocatable_bucket_leaves_repository_unchanged() {
    let mut repo = BucketRepository::new(1, 1);
    let mut dir = Recorder::default();
    // 2^63 bytes per column
    let huge = vec![FieldDescriptor::of::<f64>("huge").restrict(EntityKind::NODE, 0, &[1 << 30, 1 << 30])];

    let err = repo
        .insert_entity(EntityKind::NODE, &[0], &huge, e(1), &mut dir)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::ResourceExhaustion);
    assert!(dir.table.is_empty());
    assert_eq!(repo.stats().buckets, 0);
    assert!(repo.buckets(EntityKind::NODE).unwrap().is_empty());
}

#[test]
fn test_overflowing_layout_is_resource_exhaustion() {
    let mut repo = BucketRepository::new(4, 1);
    let field = FieldDescriptor::of::<f64>("x").restrict(EntityKind::NODE, 0, &[1 << 31, 1 << 31, 8]);

    let err = repo.declare_bucket(EntityKind::NODE, &[0], &[field]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ResourceExhaustion);
    assert_eq!(repo.stats().buckets, 0);
}
