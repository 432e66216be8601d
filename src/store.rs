//! The property store: per-key partitions over one editable sequence.
//!
//! Design decisions:
//!
//! - One store owns one [`Arena`] and one partition per key that currently
//!   carries properties. Keys with no properties have no partition; queries
//!   treat a missing partition as "empty everywhere".
//! - The core state sits behind `Rc<RefCell<StoreCore>>` so a detached-side
//!   operation ([`Property::detach`], re-attaching to another store) can
//!   reach back into the owning store through the property's weak link.
//!   Public mutators still take `&mut self`; the interior mutability is for
//!   the back-edge only.
//! - `insert`, `delete` and `replace` are one splice: remove `removed`
//!   positions at `pos`, put `inserted` in their place. Boundary splits,
//!   endpoint remapping (sticky or not) and canonical re-merging all happen
//!   in a single pass per partition.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::trace;

use crate::arena::{Arena, IvIdx, NONE};
use crate::error::{Error, Result};
use crate::partition::{Partition, stacks_value_equal};
use crate::property::{Key, PropFlags, PropInner, Property, Value, Volatility};

pub(crate) struct StoreCore {
    pub(crate) len: u64,
    pub(crate) arena: Arena,
    pub(crate) parts: FxHashMap<Key, Partition>,
}

impl Drop for StoreCore {
    /// Release every interval's property references, so handles the caller
    /// still holds read as detached once their store is gone.
    fn drop(&mut self) {
        for part in self.parts.values() {
            let mut iv = part.head;
            while iv != NONE {
                self.arena[iv].clear_stack();
                iv = self.arena[iv].next;
            }
        }
    }
}

/// A property store over a sequence of `len` positions.
///
/// The store holds no sequence content, only properties over position
/// ranges; edits are reported to it through [`insert`](PropStore::insert),
/// [`delete`](PropStore::delete) and [`replace`](PropStore::replace) so the
/// ranges track the text they annotate.
pub struct PropStore {
    core: Rc<RefCell<StoreCore>>,
}

fn check_point(len: u64, pos: u64) -> Result<()> {
    if pos >= len {
        return Err(Error::Position { pos, len });
    }
    return Ok(());
}

fn check_range(len: u64, from: u64, to: u64) -> Result<()> {
    if from > to || to > len {
        return Err(Error::Range { from, to, len });
    }
    return Ok(());
}

fn check_key(key: Key) -> Result<()> {
    if key.is_nil() {
        return Err(Error::NilKey);
    }
    return Ok(());
}

fn ensure_partition(core: &mut StoreCore, key: Key) {
    if !core.parts.contains_key(&key) {
        let part = Partition::new(&mut core.arena, key, core.len);
        core.parts.insert(key, part);
    }
}

fn prune_if_empty(arena: &mut Arena, parts: &mut FxHashMap<Key, Partition>, key: Key) {
    let empty = match parts.get(&key) {
        Some(part) => part.is_empty(arena),
        None => false,
    };
    if empty {
        let part = parts.remove(&key).expect("partition present");
        arena.free(part.head);
    }
}

/// Remove `prop` from the partitions of `core`. Called from
/// [`Property::detach`] through the weak owner link as well as internally.
pub(crate) fn detach_in(core: &mut StoreCore, prop: &Property) {
    if !prop.is_attached() {
        return;
    }
    let key = prop.key();
    let StoreCore { arena, parts, .. } = core;
    let Some(part) = parts.get_mut(&key) else {
        debug_assert!(false, "attached property without a partition");
        return;
    };
    part.detach(arena, prop);
    prune_if_empty(arena, parts, key);
}

/// Detach volatile properties overlapping `from..to` before a write or an
/// edit lands there. Strong volatility reacts to any touch; weak volatility
/// only to actual deletion. A zero-width range (`from == to`) marks an
/// insertion point and strips only properties strictly containing it.
fn strip_volatile(core: &mut StoreCore, from: u64, to: u64, deleting: bool) {
    let keys: Vec<Key> = core.parts.keys().copied().collect();
    for key in keys {
        let mut doomed: Vec<Property> = Vec::new();
        {
            let Some(part) = core.parts.get(&key) else {
                continue;
            };
            let arena = &core.arena;
            if from >= arena[part.tail].end {
                continue;
            }
            let scan_to = if from == to { from + 1 } else { to };
            let mut seen: FxHashSet<*const PropInner> = FxHashSet::default();
            let mut iv = part.find(arena, from);
            while iv != NONE && arena[iv].start < scan_to {
                for prop in &arena[iv].stack {
                    let strip = match prop.flags().volatility {
                        Volatility::Strong => true,
                        Volatility::Weak => deleting,
                        Volatility::None => false,
                    };
                    if strip
                        && prop.start() < to
                        && prop.end() > from
                        && seen.insert(prop.as_ptr())
                    {
                        doomed.push(prop.clone());
                    }
                }
                iv = arena[iv].next;
            }
        }
        for prop in doomed {
            detach_in(core, &prop);
        }
    }
}

/// Shift a property's endpoints across a splice replacing
/// `pos..pos + removed` with `inserted` positions. Endpoints strictly
/// outside the cut shift rigidly; endpoints on or inside it land on the
/// matching edge of the insertion, pulled across it by the sticky flags.
fn remap_prop(prop: &Property, pos: u64, removed: u64, inserted: u64) {
    let cut_end = pos + removed;
    let start = prop.start();
    let end = prop.end();
    let new_start = if start < pos {
        start
    } else if start <= cut_end {
        if prop.flags().front_sticky { pos } else { pos + inserted }
    } else {
        start - removed + inserted
    };
    let new_end = if end < pos {
        end
    } else if end <= cut_end {
        if prop.flags().rear_sticky { pos + inserted } else { pos }
    } else {
        end - removed + inserted
    };
    prop.set_range(new_start, new_end);
}

fn splice_partition(
    core: &mut StoreCore,
    key: Key,
    pos: u64,
    removed: u64,
    inserted: u64,
    spart: Option<&SlicePart>,
    owner: &Weak<RefCell<StoreCore>>,
) {
    let StoreCore { arena, parts, .. } = core;
    let Some(part) = parts.get_mut(&key) else {
        return;
    };

    let left;
    let right;
    if arena[part.head].start == arena[part.head].end {
        // An empty domain is tiled by one zero-width interval; discard it
        // outright, the inserted segment becomes the whole chain.
        debug_assert!(arena[part.head].stack.is_empty());
        let head = part.head;
        part.unlink_free(arena, head);
        left = NONE;
        right = NONE;
    } else {
        part.split_at(arena, pos);
        part.split_at(arena, pos + removed);
        left = if pos == 0 { NONE } else { part.find(arena, pos - 1) };

        // Drop every interval inside the cut. Properties confined to the
        // cut lose their last references here and come out detached.
        let mut iv = if left == NONE { part.head } else { arena[left].next };
        while iv != NONE && arena[iv].start < pos + removed {
            let next = arena[iv].next;
            arena[iv].clear_stack();
            part.unlink_free(arena, iv);
            iv = next;
        }
        right = if left == NONE { part.head } else { arena[left].next };
    }

    // Shift the surviving interval boundaries and remap each surviving
    // property once.
    let mut seen: FxHashSet<*const PropInner> = FxHashSet::default();
    let mut iv = part.head;
    while iv != NONE {
        let node = &mut arena[iv];
        if node.start >= pos + removed {
            node.start = node.start - removed + inserted;
        }
        if node.end > pos {
            node.end = node.end - removed + inserted;
        }
        for prop in &node.stack {
            if seen.insert(prop.as_ptr()) {
                remap_prop(prop, pos, removed, inserted);
            }
        }
        iv = node.next;
    }

    if inserted > 0 {
        // Build the interval chain for the inserted span.
        let mut segment: Vec<IvIdx> = Vec::new();
        match spart {
            Some(spart) => {
                let props: Vec<Property> = spart
                    .props
                    .iter()
                    .map(|p| {
                        p.clone_with_range(p.start() + pos, p.end() + pos, Some(owner.clone()))
                    })
                    .collect();
                let mut cursor = 0;
                for si in &spart.intervals {
                    if si.start > cursor {
                        segment.push(arena.alloc(pos + cursor, pos + si.start));
                    }
                    let iv = arena.alloc(pos + si.start, pos + si.end);
                    for &slot in &si.stack {
                        arena[iv].push_prop(props[slot as usize].clone());
                    }
                    segment.push(iv);
                    cursor = si.end;
                }
                if cursor < inserted {
                    segment.push(arena.alloc(pos + cursor, pos + inserted));
                }
            }
            None => segment.push(arena.alloc(pos, pos + inserted)),
        }
        for pair in segment.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            arena[a].next = b;
            arena[b].prev = a;
        }
        let first = *segment.first().expect("segment has at least one interval");
        let last = *segment.last().expect("segment has at least one interval");
        arena[first].prev = left;
        arena[last].next = right;
        if left != NONE {
            arena[left].next = first;
        } else {
            part.head = first;
        }
        if right != NONE {
            arena[right].prev = last;
        } else {
            part.tail = last;
        }

        // Properties whose remapped range reaches over the inserted span
        // must cover it: survivors widened across it and sticky neighbors.
        // They go below any slice properties; surrounding context underlies
        // pasted content.
        let mut carried: Vec<Property> = Vec::new();
        if left != NONE {
            for prop in &arena[left].stack {
                if prop.end() > pos {
                    carried.push(prop.clone());
                }
            }
        }
        if right != NONE {
            for prop in &arena[right].stack {
                if prop.start() < pos + inserted
                    && !carried.iter().any(|p| p.same_object(prop))
                {
                    carried.push(prop.clone());
                }
            }
        }
        for &iv in &segment {
            for (level, prop) in carried.iter().enumerate() {
                arena[iv].insert_prop(level, prop.clone());
            }
        }
    } else if part.head == NONE {
        // The whole domain was deleted; restore the degenerate tiling of
        // the empty sequence.
        let iv = arena.alloc(pos, pos);
        part.head = iv;
        part.tail = iv;
    }

    part.merge_range(arena, pos, pos + inserted);
    prune_if_empty(arena, parts, key);
}

impl PropStore {
    /// A store over a sequence of `len` positions, with no properties.
    pub fn new(len: u64) -> PropStore {
        return PropStore {
            core: Rc::new(RefCell::new(StoreCore {
                len,
                arena: Arena::new(),
                parts: FxHashMap::default(),
            })),
        };
    }

    /// Length of the underlying sequence.
    pub fn len(&self) -> u64 {
        return self.core.borrow().len;
    }

    /// Whether the underlying sequence is empty.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// The topmost value for `key` at `pos`, if any.
    pub fn get(&self, pos: u64, key: Key) -> Result<Option<Value>> {
        let core = self.core.borrow();
        check_point(core.len, pos)?;
        check_key(key)?;
        let Some(part) = core.parts.get(&key) else {
            return Ok(None);
        };
        let iv = part.find(&core.arena, pos);
        return Ok(core.arena[iv].top().map(|p| p.value().clone()));
    }

    /// Up to `max` values for `key` at `pos`, bottom to top. When the stack
    /// is deeper than `max` the topmost `max` values are kept.
    pub fn get_values(&self, pos: u64, key: Key, max: usize) -> Result<Vec<Value>> {
        let core = self.core.borrow();
        check_point(core.len, pos)?;
        check_key(key)?;
        let Some(part) = core.parts.get(&key) else {
            return Ok(Vec::new());
        };
        let iv = part.find(&core.arena, pos);
        let stack = &core.arena[iv].stack;
        let skip = stack.len().saturating_sub(max);
        return Ok(stack[skip..].iter().map(|p| p.value().clone()).collect());
    }

    /// Every key carrying at least one property at `pos`, ordered by id.
    pub fn get_keys(&self, pos: u64) -> Result<Vec<Key>> {
        let core = self.core.borrow();
        check_point(core.len, pos)?;
        let mut keys: Vec<Key> = core
            .parts
            .iter()
            .filter(|(_, part)| !core.arena[part.find(&core.arena, pos)].stack.is_empty())
            .map(|(key, _)| *key)
            .collect();
        keys.sort_by_key(|key| key.id());
        return Ok(keys);
    }

    /// The topmost property object for `key` at `pos`, if any.
    pub fn property_at(&self, pos: u64, key: Key) -> Result<Option<Property>> {
        let core = self.core.borrow();
        check_point(core.len, pos)?;
        check_key(key)?;
        let Some(part) = core.parts.get(&key) else {
            return Ok(None);
        };
        let iv = part.find(&core.arena, pos);
        return Ok(core.arena[iv].top().cloned());
    }

    /// Every property object for `key` at `pos`, bottom to top.
    pub fn properties_at(&self, pos: u64, key: Key) -> Result<Vec<Property>> {
        let core = self.core.borrow();
        check_point(core.len, pos)?;
        check_key(key)?;
        let Some(part) = core.parts.get(&key) else {
            return Ok(Vec::new());
        };
        let iv = part.find(&core.arena, pos);
        return Ok(core.arena[iv].stack.to_vec());
    }

    /// The maximal run around `pos` over which `key` looks the same, plus
    /// the stack depth at `pos`.
    ///
    /// With `deep` the whole stack must match value-for-value across the
    /// run; otherwise only the topmost value is compared. Property object
    /// boundaries inside the run are invisible: two adjoining no-merge
    /// properties with the same value still form one run.
    pub fn prop_range(&self, pos: u64, key: Key, deep: bool) -> Result<(u64, u64, usize)> {
        let core = self.core.borrow();
        check_point(core.len, pos)?;
        check_key(key)?;
        let Some(part) = core.parts.get(&key) else {
            return Ok((0, core.len, 0));
        };
        let arena = &core.arena;
        let iv = part.find(arena, pos);
        let depth = arena[iv].stack.len();

        let matches = |a: IvIdx, b: IvIdx| -> bool {
            if deep {
                return stacks_value_equal(&arena[a], &arena[b]);
            }
            return match (arena[a].top(), arena[b].top()) {
                (None, None) => true,
                (Some(p), Some(q)) => p.value().same(q.value()),
                _ => false,
            };
        };

        let mut first = iv;
        loop {
            let prev = arena[first].prev;
            if prev == NONE || !matches(prev, iv) {
                break;
            }
            first = prev;
        }
        let mut last = iv;
        loop {
            let next = arena[last].next;
            if next == NONE || !matches(next, iv) {
                break;
            }
            last = next;
        }
        return Ok((arena[first].start, arena[last].end, depth));
    }

    /// Replace every value for `key` over `from..to` with a single `value`.
    pub fn put(&mut self, from: u64, to: u64, key: Key, value: Value) -> Result<()> {
        return self.put_values(from, to, key, std::slice::from_ref(&value));
    }

    /// Replace every value for `key` over `from..to` with the given stack,
    /// bottom to top. An empty stack clears the range.
    pub fn put_values(&mut self, from: u64, to: u64, key: Key, values: &[Value]) -> Result<()> {
        let owner = Rc::downgrade(&self.core);
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        check_range(core.len, from, to)?;
        check_key(key)?;
        trace!(from, to, key = key.id(), depth = values.len(), "put");
        if from == to {
            return Ok(());
        }
        strip_volatile(core, from, to, false);
        ensure_partition(core, key);
        let StoreCore { arena, parts, .. } = core;
        let part = parts.get_mut(&key).expect("partition just ensured");
        part.split_at(arena, from);
        part.split_at(arena, to);

        // Confine properties crossing a boundary of the written range so
        // truncation inside it cannot disturb them outside it.
        let first = part.find(arena, from);
        let crossing: Vec<Property> = arena[first]
            .stack
            .iter()
            .filter(|p| p.start() < from)
            .cloned()
            .collect();
        for prop in crossing {
            part.split_prop(arena, &prop, from);
        }
        let last = part.find(arena, to - 1);
        let crossing: Vec<Property> = arena[last]
            .stack
            .iter()
            .filter(|p| p.end() > to)
            .cloned()
            .collect();
        for prop in crossing {
            part.split_prop(arena, &prop, to);
        }

        // Empty the range and collapse it to one interval.
        let first = part.find(arena, from);
        let mut iv = first;
        loop {
            arena[iv].clear_stack();
            let next = arena[iv].next;
            if next == NONE || arena[next].start >= to {
                break;
            }
            iv = next;
        }
        while arena[first].end < to {
            let next = arena[first].next;
            arena[first].end = arena[next].end;
            part.unlink_free(arena, next);
        }

        for value in values {
            let prop = Property::raw(
                key,
                value.clone(),
                PropFlags::default(),
                from,
                to,
                Some(owner.clone()),
            );
            arena[first].push_prop(prop);
        }
        part.merge_range(arena, from, to);
        prune_if_empty(arena, parts, key);
        return Ok(());
    }

    /// Push `value` on top of the `key` stack over `from..to`, leaving
    /// existing values underneath.
    pub fn push(&mut self, from: u64, to: u64, key: Key, value: Value) -> Result<()> {
        let owner = Rc::downgrade(&self.core);
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        check_range(core.len, from, to)?;
        check_key(key)?;
        trace!(from, to, key = key.id(), "push");
        if from == to {
            return Ok(());
        }
        strip_volatile(core, from, to, false);
        ensure_partition(core, key);
        let StoreCore { arena, parts, .. } = core;
        let part = parts.get_mut(&key).expect("partition just ensured");
        part.split_at(arena, from);
        part.split_at(arena, to);

        let prop = Property::raw(key, value, PropFlags::default(), from, to, Some(owner));
        let mut iv = part.find(arena, from);
        while iv != NONE && arena[iv].start < to {
            arena[iv].push_prop(prop.clone());
            iv = arena[iv].next;
        }
        part.merge_range(arena, from, to);
        return Ok(());
    }

    /// Pop the topmost value for `key` from every position in `from..to`.
    /// Positions with an empty stack are left alone. A property only partly
    /// inside the range is split and only the inside part removed.
    pub fn pop(&mut self, from: u64, to: u64, key: Key) -> Result<()> {
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        check_range(core.len, from, to)?;
        check_key(key)?;
        trace!(from, to, key = key.id(), "pop");
        if from == to || !core.parts.contains_key(&key) {
            return Ok(());
        }
        strip_volatile(core, from, to, false);
        let StoreCore { arena, parts, .. } = core;
        let Some(part) = parts.get_mut(&key) else {
            return Ok(());
        };
        part.split_at(arena, from);
        part.split_at(arena, to);

        let mut pos = from;
        while pos < to {
            let iv = part.find(arena, pos);
            debug_assert_eq!(arena[iv].start, pos);
            let Some(top) = arena[iv].top().cloned() else {
                pos = arena[iv].end;
                continue;
            };
            let mut target = top;
            if target.start() < pos {
                target = part.split_prop(arena, &target, pos);
            }

            // Extend over every following interval where `target` is still
            // on top, clamped to the popped range.
            let mut run_end = arena[iv].end;
            let mut walk = arena[iv].next;
            while walk != NONE && arena[walk].start < to {
                match arena[walk].top() {
                    Some(t) if t.same_object(&target) => {
                        run_end = arena[walk].end;
                        walk = arena[walk].next;
                    }
                    _ => break,
                }
            }
            if target.end() > run_end {
                part.split_prop(arena, &target, run_end);
            }

            let mut walk = iv;
            while walk != NONE && arena[walk].start < run_end {
                let popped = arena[walk].pop_prop();
                debug_assert!(matches!(&popped, Some(p) if p.same_object(&target)));
                walk = arena[walk].next;
            }
            pos = run_end;
        }
        part.merge_range(arena, from, to);
        prune_if_empty(arena, parts, key);
        return Ok(());
    }

    /// Attach a detached property over `from..to`, which must be non-empty.
    /// A property still attached somewhere, in this store or another, is
    /// detached from there first.
    pub fn attach_property(&mut self, prop: &Property, from: u64, to: u64) -> Result<()> {
        {
            let core = self.core.borrow();
            check_range(core.len, from, to)?;
            if from == to {
                return Err(Error::Range { from, to, len: core.len });
            }
        }
        if prop.is_attached() {
            if let Some(owner) = prop.owner_core() {
                detach_in(&mut owner.borrow_mut(), prop);
            }
        }
        self.attach_over(prop, from, to);
        return Ok(());
    }

    /// Attach a detached property over `from..to`, failing with
    /// [`Error::Attached`] when it is attached anywhere.
    pub fn push_property(&mut self, prop: &Property, from: u64, to: u64) -> Result<()> {
        {
            let core = self.core.borrow();
            check_range(core.len, from, to)?;
            if from == to {
                return Err(Error::Range { from, to, len: core.len });
            }
        }
        if prop.is_attached() {
            return Err(Error::Attached);
        }
        self.attach_over(prop, from, to);
        return Ok(());
    }

    fn attach_over(&mut self, prop: &Property, from: u64, to: u64) {
        let owner = Rc::downgrade(&self.core);
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        trace!(from, to, key = prop.key().id(), "attach");
        strip_volatile(core, from, to, false);
        prop.set_range(from, to);
        prop.set_owner(owner);
        ensure_partition(core, prop.key());
        let StoreCore { arena, parts, .. } = core;
        let part = parts.get_mut(&prop.key()).expect("partition just ensured");
        part.split_at(arena, from);
        part.split_at(arena, to);
        let mut iv = part.find(arena, from);
        while iv != NONE && arena[iv].start < to {
            arena[iv].push_prop(prop.clone());
            iv = arena[iv].next;
        }
        part.merge_range(arena, from, to);
    }

    /// Detach `prop` from this (or any) store. Equivalent to
    /// [`Property::detach`]; a no-op when already detached.
    pub fn detach_property(&mut self, prop: &Property) -> Result<()> {
        prop.detach();
        return Ok(());
    }

    /// Report an insertion of `len` positions at `pos`. Properties shift
    /// and widen to follow; a slice from [`extract`](PropStore::extract)
    /// populates the new span.
    pub fn insert(&mut self, pos: u64, len: u64, slice: Option<&PropSlice>) -> Result<()> {
        return self.splice(pos, 0, len, slice);
    }

    /// Report a deletion of `len` positions at `pos`.
    pub fn delete(&mut self, pos: u64, len: u64) -> Result<()> {
        return self.splice(pos, len, 0, None);
    }

    /// Report `removed` positions at `pos` replaced by `inserted` fresh
    /// ones.
    pub fn replace(&mut self, pos: u64, removed: u64, inserted: u64) -> Result<()> {
        return self.splice(pos, removed, inserted, None);
    }

    fn splice(
        &mut self,
        pos: u64,
        removed: u64,
        inserted: u64,
        slice: Option<&PropSlice>,
    ) -> Result<()> {
        let owner = Rc::downgrade(&self.core);
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        check_range(core.len, pos, pos.saturating_add(removed))?;
        if let Some(slice) = slice {
            if slice.len != inserted {
                return Err(Error::SliceLen { expected: inserted, got: slice.len });
            }
        }
        if removed == 0 && inserted == 0 {
            return Ok(());
        }
        trace!(pos, removed, inserted, "splice");
        strip_volatile(core, pos, pos + removed, removed > 0);

        // Keys arriving only through the slice need a partition over the
        // pre-edit domain for the splice to rebuild.
        if let Some(slice) = slice {
            for spart in &slice.parts {
                ensure_partition(core, spart.key);
            }
        }

        let keys: Vec<Key> = core.parts.keys().copied().collect();
        for key in keys {
            let spart = slice.and_then(|s| s.parts.iter().find(|p| p.key == key));
            splice_partition(core, key, pos, removed, inserted, spart, &owner);
        }
        core.len = core.len - removed + inserted;
        return Ok(());
    }

    /// Copy the properties over `from..to` into a detached, reusable slice
    /// with ranges rebased to the slice origin. Properties reaching outside
    /// the range are clamped to it.
    pub fn extract(&self, from: u64, to: u64) -> Result<PropSlice> {
        let core = self.core.borrow();
        check_range(core.len, from, to)?;
        if from == to {
            return Ok(PropSlice { len: 0, parts: Vec::new() });
        }
        let arena = &core.arena;
        let mut keys: Vec<Key> = core.parts.keys().copied().collect();
        keys.sort_by_key(|key| key.id());

        let mut parts = Vec::new();
        for key in keys {
            let part = &core.parts[&key];
            let mut props: Vec<Property> = Vec::new();
            let mut index: FxHashMap<*const PropInner, u32> = FxHashMap::default();
            let mut intervals: Vec<SliceInterval> = Vec::new();
            let mut iv = part.find(arena, from);
            while iv != NONE && arena[iv].start < to {
                let node = &arena[iv];
                let mut stack: SmallVec<[u32; 2]> = SmallVec::new();
                for prop in &node.stack {
                    let slot = *index.entry(prop.as_ptr()).or_insert_with(|| {
                        let start = prop.start().max(from) - from;
                        let end = prop.end().min(to) - from;
                        props.push(prop.clone_with_range(start, end, None));
                        return (props.len() - 1) as u32;
                    });
                    stack.push(slot);
                }
                if !stack.is_empty() {
                    intervals.push(SliceInterval {
                        start: node.start.max(from) - from,
                        end: node.end.min(to) - from,
                        stack,
                    });
                }
                iv = node.next;
            }
            if !props.is_empty() {
                parts.push(SlicePart { key, props, intervals });
            }
        }
        return Ok(PropSlice { len: to - from, parts });
    }

    /// Assert every structural invariant of the store. Test support.
    pub fn check_invariants(&self) {
        let core = self.core.borrow();
        for (key, part) in &core.parts {
            assert_eq!(*key, part.key, "partition filed under the wrong key");
            assert!(!part.is_empty(&core.arena), "empty partition not pruned");
            part.check(&core.arena, core.len);
        }
    }
}

/// Properties captured from a sub-range of a store, detached from any
/// sequence.
///
/// Produced by [`extract`](PropStore::extract), consumed by
/// [`insert`](PropStore::insert). Extraction copies, so the source store
/// may change or be dropped afterwards, and one slice can be inserted any
/// number of times; shared values keep their identity across the copy.
pub struct PropSlice {
    len: u64,
    parts: Vec<SlicePart>,
}

struct SlicePart {
    key: Key,
    /// Detached property prototypes with slice-relative ranges.
    props: Vec<Property>,
    /// Slice-relative interval bounds with stacks of indices into `props`.
    /// Sub-ranges with no properties for the key are not recorded.
    intervals: Vec<SliceInterval>,
}

struct SliceInterval {
    start: u64,
    end: u64,
    stack: SmallVec<[u32; 2]>,
}

impl PropSlice {
    /// Length of the extracted range.
    pub fn len(&self) -> u64 {
        return self.len;
    }

    /// Whether the slice covers an empty range.
    pub fn is_empty(&self) -> bool {
        return self.len == 0;
    }

    /// Number of keys with at least one property in the slice.
    pub fn key_count(&self) -> usize {
        return self.parts.len();
    }
}
