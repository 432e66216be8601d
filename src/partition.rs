//! Per-key interval chains.
//!
//! A partition is a doubly-linked chain of intervals that exactly tiles the
//! sequence domain `[0, N)` for one key. Two structural invariants hold
//! after every public store mutation:
//!
//! 1. **Tiling**: intervals are disjoint, contiguous and ordered; every
//!    property on an interval's stack spans at least that interval.
//! 2. **Canonical form**: no two adjacent intervals are mergeable — equal
//!    stack depth with, level by level, either the same property object or
//!    two adjoining same-value properties neither of which is no-merge.
//!
//! Lookup walks from a cached interval, starting from head or tail instead
//! when they are closer, which is near-O(1) under the temporal locality of
//! text editing and O(#intervals) at worst.

use std::cell::Cell;

use rustc_hash::FxHashMap;

use crate::arena::{Arena, Interval, IvIdx, NONE};
use crate::property::{Key, PropInner, Property};

/// The full interval chain for one key.
pub(crate) struct Partition {
    pub key: Key,
    pub head: IvIdx,
    pub tail: IvIdx,
    /// Last interval returned by `find`.
    cache: Cell<IvIdx>,
}

/// Whether two adjacent intervals may merge under the canonical-form rule.
pub(crate) fn stacks_mergeable(a: &Interval, b: &Interval) -> bool {
    if a.stack.len() != b.stack.len() {
        return false;
    }
    return a
        .stack
        .iter()
        .zip(&b.stack)
        .all(|(p, q)| p.same_object(q) || p.can_merge_before(q));
}

/// Whether two intervals carry identity-equal values level by level.
pub(crate) fn stacks_value_equal(a: &Interval, b: &Interval) -> bool {
    if a.stack.len() != b.stack.len() {
        return false;
    }
    return a
        .stack
        .iter()
        .zip(&b.stack)
        .all(|(p, q)| p.value().same(q.value()));
}

impl Partition {
    /// A partition tiling `[0, len)` with a single empty interval.
    pub fn new(arena: &mut Arena, key: Key, len: u64) -> Partition {
        let iv = arena.alloc(0, len);
        return Partition { key, head: iv, tail: iv, cache: Cell::new(iv) };
    }

    /// The interval covering `pos`.
    ///
    /// Head and tail are checked directly; otherwise the walk starts from
    /// the cached interval, or from head/tail when the position distance
    /// says they are nearer.
    pub fn find(&self, arena: &Arena, pos: u64) -> IvIdx {
        debug_assert!(pos < arena[self.tail].end);
        let head = &arena[self.head];
        if pos < head.end {
            self.cache.set(self.head);
            return self.head;
        }
        let tail = &arena[self.tail];
        if pos >= tail.start {
            self.cache.set(self.tail);
            return self.tail;
        }

        let mut cached = self.cache.get();
        if cached == NONE {
            cached = self.head;
        }
        let found;
        if pos < arena[cached].start {
            let from_cache = arena[cached].start - pos;
            let from_head = pos - head.end;
            if from_head < from_cache {
                found = Self::walk_forward(arena, self.head, pos);
            } else {
                found = Self::walk_backward(arena, cached, pos);
            }
        } else if pos >= arena[cached].end {
            let from_cache = pos - arena[cached].end;
            let from_tail = tail.start - pos;
            if from_tail < from_cache {
                found = Self::walk_backward(arena, self.tail, pos);
            } else {
                found = Self::walk_forward(arena, cached, pos);
            }
        } else {
            found = cached;
        }
        self.cache.set(found);
        return found;
    }

    fn walk_forward(arena: &Arena, mut iv: IvIdx, pos: u64) -> IvIdx {
        while pos >= arena[iv].end {
            iv = arena[iv].next;
            debug_assert_ne!(iv, NONE);
        }
        return iv;
    }

    fn walk_backward(arena: &Arena, mut iv: IvIdx, pos: u64) -> IvIdx {
        while pos < arena[iv].start {
            iv = arena[iv].prev;
            debug_assert_ne!(iv, NONE);
        }
        return iv;
    }

    /// Ensure an interval boundary at `pos`, dividing the covering interval
    /// when `pos` falls strictly inside it. The new right half gets a
    /// shallow copy of the stack; each property gains a referencing
    /// interval.
    pub fn split_at(&mut self, arena: &mut Arena, pos: u64) {
        if pos == 0 || pos >= arena[self.tail].end {
            return;
        }
        let iv = self.find(arena, pos);
        if arena[iv].start == pos {
            return;
        }
        let end = arena[iv].end;
        let right = arena.alloc(pos, end);

        let stack = arena[iv].stack.clone();
        for prop in &stack {
            prop.incr_attach();
        }
        arena[right].stack = stack;

        let next = arena[iv].next;
        arena[right].prev = iv;
        arena[right].next = next;
        arena[iv].next = right;
        arena[iv].end = pos;
        if next != NONE {
            arena[next].prev = right;
        } else {
            self.tail = right;
        }
    }

    /// Unlink `iv` from the chain and return it to the pool. The stack must
    /// already have been cleared.
    pub fn unlink_free(&mut self, arena: &mut Arena, iv: IvIdx) {
        let (prev, next) = (arena[iv].prev, arena[iv].next);
        if prev != NONE {
            arena[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NONE {
            arena[next].prev = prev;
        } else {
            self.tail = prev;
        }
        if self.cache.get() == iv {
            self.cache.set(if next != NONE { next } else { prev });
        }
        arena.free(iv);
    }

    /// Merge `iv` with its successor if the canonical-form rule allows,
    /// returning whether a merge happened.
    ///
    /// Level by level the stacks must hold either the same property object
    /// or two different adjoining properties with the same key and value,
    /// neither flagged no-merge. In the latter case the left property
    /// absorbs the right one — range extended, every forward interval
    /// reference rewritten — keeping the property object count minimal.
    pub fn maybe_merge(&mut self, arena: &mut Arena, iv: IvIdx) -> bool {
        let next = arena[iv].next;
        if next == NONE {
            return false;
        }
        if !stacks_mergeable(&arena[iv], &arena[next]) {
            return false;
        }

        let absorptions: Vec<(Property, Property)> = arena[iv]
            .stack
            .iter()
            .zip(&arena[next].stack)
            .filter(|(p, q)| !p.same_object(q))
            .map(|(p, q)| (p.clone(), q.clone()))
            .collect();
        for (left, right) in &absorptions {
            self.absorb(arena, left, right, next);
        }

        // The stacks are now identical object-for-object; fold the right
        // interval into the left one.
        let right_end = arena[next].end;
        arena[iv].end = right_end;
        arena[next].clear_stack();
        self.unlink_free(arena, next);
        return true;
    }

    /// Make `left` absorb `right`: extend its range over `right`'s and
    /// rewrite every interval stack from `from` forward to reference
    /// `left` instead.
    fn absorb(&mut self, arena: &mut Arena, left: &Property, right: &Property, from: IvIdx) {
        debug_assert!(left.can_merge_before(right));
        let right_end = right.end();
        left.set_end(right_end);
        let mut iv = from;
        while iv != NONE && arena[iv].start < right_end {
            let node = &mut arena[iv];
            if let Some(slot) = node.stack.iter_mut().find(|p| p.same_object(right)) {
                *slot = left.clone();
                left.incr_attach();
                right.decr_attach();
            }
            iv = arena[iv].next;
        }
        debug_assert!(!right.is_attached());
    }

    /// Attempt merges at every interval boundary in `[from, to]`, plus the
    /// boundary just before `from`. Restores canonical form over a region
    /// an edit touched.
    pub fn merge_range(&mut self, arena: &mut Arena, from: u64, to: u64) {
        let mut iv = if from == 0 { self.head } else { self.find(arena, from - 1) };
        loop {
            while self.maybe_merge(arena, iv) {}
            let next = arena[iv].next;
            if next == NONE || arena[next].start > to {
                break;
            }
            iv = next;
        }
    }

    /// Split `prop` at `at`: truncate it to `[start, at)` and return a copy
    /// covering `[at, end)`, with every interval stack from `at` on
    /// rewritten to the copy. `at` must be an existing interval boundary
    /// strictly inside the property.
    pub fn split_prop(&mut self, arena: &mut Arena, prop: &Property, at: u64) -> Property {
        debug_assert!(prop.start() < at && at < prop.end());
        debug_assert_eq!(prop.key(), self.key);

        let copy = prop.clone_with_range(at, prop.end(), prop.owner_weak());
        let end = prop.end();
        let mut iv = self.find(arena, at);
        debug_assert_eq!(arena[iv].start, at, "property split off an interval boundary");
        while iv != NONE && arena[iv].start < end {
            let node = &mut arena[iv];
            let slot = node
                .stack
                .iter_mut()
                .find(|p| p.same_object(prop))
                .expect("property missing from an interval inside its range");
            *slot = copy.clone();
            copy.incr_attach();
            prop.decr_attach();
            iv = arena[iv].next;
        }
        prop.set_end(at);
        return copy;
    }

    /// Remove `prop` from every interval it covers and restore canonical
    /// form over the vacated region.
    pub fn detach(&mut self, arena: &mut Arena, prop: &Property) {
        let (start, end) = (prop.start(), prop.end());
        let mut iv = self.find(arena, start);
        while iv != NONE && arena[iv].start < end {
            let removed = arena[iv].remove_prop(prop);
            debug_assert!(removed, "property missing from an interval inside its range");
            iv = arena[iv].next;
        }
        debug_assert!(!prop.is_attached());
        self.merge_range(arena, start, end);
    }

    /// Whether the partition holds no properties at all. Canonical merging
    /// collapses an all-empty partition to a single interval, so checking
    /// the head suffices.
    pub fn is_empty(&self, arena: &Arena) -> bool {
        return self.head == self.tail && arena[self.head].stack.is_empty();
    }

    /// Assert the tiling, canonical-form and reference-count invariants.
    pub fn check(&self, arena: &Arena, len: u64) {
        assert_eq!(arena[self.head].start, 0, "head must start the domain");
        assert_eq!(arena[self.tail].end, len, "tail must end the domain");

        let mut counts: FxHashMap<*const PropInner, (Property, u32)> = FxHashMap::default();
        let mut iv = self.head;
        let mut prev = NONE;
        let mut prev_end = 0;
        while iv != NONE {
            let node = &arena[iv];
            assert_eq!(node.prev, prev, "broken back link");
            assert_eq!(node.start, prev_end, "tiling gap or overlap");
            assert!(node.start < node.end || len == 0, "zero-width interval");
            for prop in &node.stack {
                assert_eq!(prop.key(), self.key, "foreign key on stack");
                assert!(
                    prop.start() <= node.start && node.end <= prop.end(),
                    "property narrower than its interval",
                );
                counts.entry(prop.as_ptr()).or_insert_with(|| (prop.clone(), 0)).1 += 1;
            }
            if node.next != NONE {
                assert!(
                    !stacks_mergeable(node, &arena[node.next]),
                    "adjacent intervals left mergeable",
                );
            }
            prev = iv;
            prev_end = node.end;
            iv = node.next;
        }
        assert_eq!(prev, self.tail, "tail not reachable from head");

        for (_, (prop, referenced)) in counts {
            assert_eq!(
                prop.attach_count(),
                referenced,
                "attach count out of sync with interval references",
            );
        }
    }
}
