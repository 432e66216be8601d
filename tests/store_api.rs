//! Tests for the public store API: writes, queries, edits, attachment and
//! slices.

use textprop::{Error, Key, PropFlags, PropStore, Property, Value, Volatility};

// =============================================================================
// Helper functions
// =============================================================================

fn bits(value: &Value) -> u64 {
    return match value {
        Value::Data(bits) => *bits,
        Value::Shared(_) => panic!("expected a data value"),
    };
}

/// Topmost value at every position, as bits.
fn tops(store: &PropStore, key: Key) -> Vec<Option<u64>> {
    return (0..store.len())
        .map(|pos| store.get(pos, key).unwrap().map(|v| bits(&v)))
        .collect();
}

/// Whole stack at one position, bottom to top, as bits.
fn stack(store: &PropStore, pos: u64, key: Key) -> Vec<u64> {
    return store
        .get_values(pos, key, usize::MAX)
        .unwrap()
        .iter()
        .map(bits)
        .collect();
}

// =============================================================================
// Writes and queries
// =============================================================================

#[test]
fn put_push_pop_scenario() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);

    store.put(2, 5, key, Value::Data(0xA)).unwrap();
    assert_eq!(tops(&store, key)[2..6], [Some(0xA), Some(0xA), Some(0xA), None]);

    store.push(3, 4, key, Value::Data(0xB)).unwrap();
    assert_eq!(stack(&store, 3, key), vec![0xA, 0xB]);
    assert!(store.get(2, key).unwrap().unwrap().same(&Value::Data(0xA)));
    assert_eq!(store.prop_range(3, key, false).unwrap(), (3, 4, 2));
    assert_eq!(store.prop_range(2, key, false).unwrap(), (2, 3, 1));

    store.pop(3, 4, key).unwrap();
    assert_eq!(stack(&store, 3, key), vec![0xA]);
    assert_eq!(store.prop_range(3, key, false).unwrap(), (2, 5, 1));

    store.delete(1, 2).unwrap();
    assert_eq!(store.len(), 8);
    assert_eq!(store.get(0, key).unwrap(), None);
    assert_eq!(store.prop_range(1, key, false).unwrap(), (1, 3, 1));
    store.check_invariants();
}

#[test]
fn put_values_stacks_bottom_to_top() {
    let key = Key::new(1);
    let mut store = PropStore::new(6);
    store.put_values(1, 5, key, &[Value::Data(1), Value::Data(2), Value::Data(3)]).unwrap();
    assert_eq!(stack(&store, 3, key), vec![1, 2, 3]);
    assert!(store.get(3, key).unwrap().unwrap().same(&Value::Data(3)));

    // A later put replaces the whole stack.
    store.put(1, 5, key, Value::Data(9)).unwrap();
    assert_eq!(stack(&store, 3, key), vec![9]);
    store.check_invariants();
}

#[test]
fn put_inside_wider_property_confines_it() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    store.put(0, 10, key, Value::Data(1)).unwrap();
    store.put(4, 6, key, Value::Data(2)).unwrap();

    assert_eq!(
        tops(&store, key),
        [1, 1, 1, 1, 2, 2, 1, 1, 1, 1].map(Some).to_vec(),
    );
    // The overwritten middle split the original cover in two objects.
    let left = store.property_at(0, key).unwrap().unwrap();
    let right = store.property_at(9, key).unwrap().unwrap();
    assert_eq!((left.start(), left.end()), (0, 4));
    assert_eq!((right.start(), right.end()), (6, 10));
    assert!(!left.same_object(&right));
    store.check_invariants();
}

#[test]
fn pop_over_mixed_runs_takes_each_top() {
    let key = Key::new(1);
    let mut store = PropStore::new(8);
    store.put(0, 4, key, Value::Data(1)).unwrap();
    store.put(4, 8, key, Value::Data(2)).unwrap();
    store.push(2, 6, key, Value::Data(9)).unwrap();

    store.pop(0, 8, key).unwrap();
    assert_eq!(
        tops(&store, key),
        vec![None, None, Some(1), Some(1), Some(2), Some(2), None, None],
    );
    store.check_invariants();
}

#[test]
fn get_keys_reports_present_keys_in_id_order() {
    let face = Key::new(3);
    let link = Key::new(1);
    let mark = Key::managed(7);
    let mut store = PropStore::new(10);
    store.put(0, 6, face, Value::Data(1)).unwrap();
    store.put(4, 8, link, Value::Data(2)).unwrap();
    store.put(5, 6, mark, Value::shared("m")).unwrap();

    assert_eq!(store.get_keys(5).unwrap(), vec![link, face, mark]);
    assert_eq!(store.get_keys(2).unwrap(), vec![face]);
    assert_eq!(store.get_keys(9).unwrap(), vec![]);
    assert!(store.get_keys(5).unwrap()[2].is_managing());
}

#[test]
fn properties_at_exposes_the_objects() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    store.put(0, 10, key, Value::Data(1)).unwrap();
    store.push(3, 7, key, Value::Data(2)).unwrap();

    let props = store.properties_at(5, key).unwrap();
    assert_eq!(props.len(), 2);
    assert_eq!((props[0].start(), props[0].end()), (0, 10));
    assert_eq!((props[1].start(), props[1].end()), (3, 7));
    let top = store.property_at(5, key).unwrap().unwrap();
    assert!(top.same_object(&props[1]));
}

#[test]
fn deep_prop_range_requires_whole_stack_match() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    store.put(0, 10, key, Value::Data(1)).unwrap();
    store.push(0, 4, key, Value::Data(2)).unwrap();
    store.push(4, 10, key, Value::Data(2)).unwrap();

    // Shallow: the top value is 2 everywhere.
    assert_eq!(store.prop_range(2, key, false).unwrap(), (0, 10, 2));
    // Deep: the full stacks match everywhere too.
    assert_eq!(store.prop_range(2, key, true).unwrap(), (0, 10, 2));

    store.pop(0, 4, key).unwrap();
    assert_eq!(store.prop_range(5, key, true).unwrap(), (4, 10, 2));
    store.check_invariants();
}

// =============================================================================
// Edits
// =============================================================================

#[test]
fn interior_insert_widens_delete_narrows() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    store.put(2, 8, key, Value::Data(1)).unwrap();

    store.insert(5, 4, None).unwrap();
    assert_eq!(store.len(), 14);
    assert_eq!(store.prop_range(3, key, false).unwrap(), (2, 12, 1));

    store.delete(4, 6).unwrap();
    assert_eq!(store.len(), 8);
    assert_eq!(store.prop_range(3, key, false).unwrap(), (2, 6, 1));
    store.check_invariants();
}

#[test]
fn delete_across_start_truncates_without_stickiness() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    store.put(2, 5, key, Value::Data(1)).unwrap();
    store.delete(1, 3).unwrap();
    assert_eq!(store.len(), 7);
    assert_eq!(tops(&store, key), vec![None, Some(1), None, None, None, None, None]);
    store.check_invariants();
}

#[test]
fn rear_sticky_survives_replacement_at_its_end() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    let flags = PropFlags { rear_sticky: true, ..PropFlags::default() };
    let sticky = Property::new(key, Value::Data(1), flags).unwrap();
    store.push_property(&sticky, 2, 5).unwrap();

    store.replace(5, 2, 3).unwrap();
    assert_eq!(store.len(), 11);
    assert_eq!((sticky.start(), sticky.end()), (2, 8));
    assert!(store.get(7, key).unwrap().unwrap().same(&Value::Data(1)));

    // Without the flag the same replacement leaves the property alone.
    let mut plain = PropStore::new(10);
    plain.put(2, 5, key, Value::Data(1)).unwrap();
    plain.replace(5, 2, 3).unwrap();
    assert_eq!(plain.prop_range(3, key, false).unwrap(), (2, 5, 1));
    plain.check_invariants();
}

#[test]
fn replacement_does_not_bridge_distinct_neighbors() {
    let key = Key::new(1);
    let mut store = PropStore::new(5);
    store.put(0, 2, key, Value::Data(1)).unwrap();
    store.put(3, 5, key, Value::Data(1)).unwrap();

    // Two same-value objects with a gap between them; replacing the gap
    // keeps the new positions bare.
    store.replace(2, 1, 2).unwrap();
    assert_eq!(
        tops(&store, key),
        vec![Some(1), Some(1), None, None, Some(1), Some(1)],
    );
    store.check_invariants();
}

#[test]
fn edits_under_other_keys_leave_a_key_untouched() {
    let face = Key::new(1);
    let link = Key::new(2);
    let mut store = PropStore::new(10);
    store.put(2, 8, face, Value::Data(1)).unwrap();
    store.put(0, 4, link, Value::Data(5)).unwrap();

    store.delete(3, 2).unwrap();
    assert_eq!(store.prop_range(4, face, false).unwrap(), (2, 6, 1));
    assert_eq!(store.prop_range(1, link, false).unwrap(), (0, 3, 1));
    store.check_invariants();
}

// =============================================================================
// Attachment and volatility
// =============================================================================

#[test]
fn attached_property_tracks_writes_over_it() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    let prop = Property::new(key, Value::Data(1), PropFlags::default()).unwrap();
    store.attach_property(&prop, 2, 8).unwrap();

    // Overwriting the middle detaches nothing but splits the cover; the
    // handle keeps pointing at the surviving left object.
    store.put(4, 6, key, Value::Data(2)).unwrap();
    assert!(prop.is_attached());
    assert_eq!((prop.start(), prop.end()), (2, 4));
    store.check_invariants();
}

#[test]
fn reattach_in_same_store_moves_the_property() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    let prop = Property::new(key, Value::Data(1), PropFlags::default()).unwrap();
    store.attach_property(&prop, 0, 3).unwrap();
    store.attach_property(&prop, 6, 9).unwrap();

    assert_eq!(
        tops(&store, key),
        vec![None, None, None, None, None, None, Some(1), Some(1), Some(1), None],
    );
    assert_eq!((prop.start(), prop.end()), (6, 9));
    store.check_invariants();
}

#[test]
fn no_merge_keeps_objects_separate_but_runs_join() {
    let key = Key::new(1);
    let mut store = PropStore::new(10);
    let flags = PropFlags { no_merge: true, ..PropFlags::default() };
    let a = Property::new(key, Value::Data(1), flags).unwrap();
    let b = Property::new(key, Value::Data(1), flags).unwrap();
    store.push_property(&a, 0, 5).unwrap();
    store.push_property(&b, 5, 10).unwrap();

    let left = store.property_at(2, key).unwrap().unwrap();
    let right = store.property_at(7, key).unwrap().unwrap();
    assert!(left.same_object(&a));
    assert!(right.same_object(&b));
    assert!(!left.same_object(&right));
    // Runs are value-based; the object boundary is invisible to them.
    assert_eq!(store.prop_range(2, key, false).unwrap(), (0, 10, 1));
    store.check_invariants();
}

#[test]
fn volatility_matrix() {
    let key = Key::new(1);
    let other = Key::new(2);
    let strong = PropFlags { volatility: Volatility::Strong, ..PropFlags::default() };
    let weak = PropFlags { volatility: Volatility::Weak, ..PropFlags::default() };

    // Strong: any overlapping write strips it.
    let mut store = PropStore::new(10);
    let prop = Property::new(key, Value::Data(1), strong).unwrap();
    store.push_property(&prop, 2, 6).unwrap();
    store.push(4, 8, other, Value::Data(9)).unwrap();
    assert!(!prop.is_attached());

    // Strong: a write not overlapping leaves it.
    let prop = Property::new(key, Value::Data(1), strong).unwrap();
    store.push_property(&prop, 2, 6).unwrap();
    store.put(6, 8, other, Value::Data(9)).unwrap();
    assert!(prop.is_attached());

    // Weak: writes and interior inserts leave it, deletion strips it.
    let prop = Property::new(key, Value::Data(2), weak).unwrap();
    let mut store = PropStore::new(10);
    store.push_property(&prop, 2, 6).unwrap();
    store.put(0, 10, other, Value::Data(9)).unwrap();
    store.insert(4, 1, None).unwrap();
    assert!(prop.is_attached());
    store.delete(3, 1).unwrap();
    assert!(!prop.is_attached());
    store.check_invariants();
}

// =============================================================================
// Slices
// =============================================================================

#[test]
fn extract_preserves_structure_and_identity() {
    let key = Key::new(1);
    let marker = Value::shared("marker");
    let mut src = PropStore::new(10);
    src.put(0, 10, key, Value::Data(1)).unwrap();
    src.push(2, 6, key, marker.clone()).unwrap();

    let slice = src.extract(4, 8).unwrap();
    assert_eq!(slice.len(), 4);
    assert_eq!(slice.key_count(), 1);

    let mut dst = PropStore::new(4);
    dst.insert(2, 4, Some(&slice)).unwrap();
    assert_eq!(dst.len(), 8);

    // Positions 2..4 came from the stacked part, 4..6 from the base only.
    let stacked = dst.get_values(2, key, usize::MAX).unwrap();
    assert_eq!(stacked.len(), 2);
    assert!(stacked[1].same(&marker), "shared identity crosses stores");
    assert_eq!(stack(&dst, 5, key), vec![1]);

    // One base object spans the whole pasted range.
    let a = store_prop(&dst, 2, key, 0);
    let b = store_prop(&dst, 5, key, 0);
    assert!(a.same_object(&b));
    assert_eq!((a.start(), a.end()), (2, 6));
    dst.check_invariants();
}

fn store_prop(store: &PropStore, pos: u64, key: Key, level: usize) -> Property {
    return store.properties_at(pos, key).unwrap()[level].clone();
}

#[test]
fn slice_is_reusable_and_source_independent() {
    let key = Key::new(1);
    let mut src = PropStore::new(6);
    src.put(0, 6, key, Value::Data(7)).unwrap();
    let slice = src.extract(1, 4).unwrap();

    // Mutating and even dropping the source does not affect the slice.
    src.put(0, 6, key, Value::Data(8)).unwrap();
    drop(src);

    let mut dst = PropStore::new(0);
    dst.insert(0, 3, Some(&slice)).unwrap();
    dst.insert(3, 3, Some(&slice)).unwrap();
    assert_eq!(dst.len(), 6);
    assert_eq!(tops(&dst, key), vec![Some(7); 6].to_vec());
    // The adjoining pastes collapse into a single run.
    assert_eq!(dst.prop_range(2, key, false).unwrap(), (0, 6, 1));
    dst.check_invariants();
}

#[test]
fn empty_slice_and_bare_insert() {
    let mut store = PropStore::new(5);
    let slice = store.extract(2, 2).unwrap();
    assert!(slice.is_empty());
    assert_eq!(slice.key_count(), 0);

    store.insert(5, 3, None).unwrap();
    assert_eq!(store.len(), 8);
    assert_eq!(store.get_keys(6).unwrap(), vec![]);
    store.check_invariants();
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn error_reporting() {
    let key = Key::new(1);
    let mut store = PropStore::new(5);

    assert_eq!(store.get(9, key), Err(Error::Position { pos: 9, len: 5 }));
    assert_eq!(store.get_keys(5), Err(Error::Position { pos: 5, len: 5 }));
    assert_eq!(store.get(0, Key::NIL), Err(Error::NilKey));
    assert_eq!(store.pop(0, 5, Key::NIL), Err(Error::NilKey));
    assert_eq!(
        store.push(2, 9, key, Value::Data(1)),
        Err(Error::Range { from: 2, to: 9, len: 5 }),
    );
    assert_eq!(store.extract(4, 2).err(), Some(Error::Range { from: 4, to: 2, len: 5 }));

    let slice = store.extract(0, 2).unwrap();
    assert_eq!(
        store.insert(0, 3, Some(&slice)),
        Err(Error::SliceLen { expected: 3, got: 2 }),
    );

    let attached = Property::new(key, Value::Data(1), PropFlags::default()).unwrap();
    store.push_property(&attached, 0, 3).unwrap();
    assert_eq!(store.push_property(&attached, 3, 5), Err(Error::Attached));

    // Failed operations leave the store untouched.
    store.check_invariants();
    assert_eq!(store.len(), 5);
}
