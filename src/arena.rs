//! Slab arena for interval nodes.
//!
//! Properties are set over long sequences with many small edits; allocating
//! every interval node on the heap would dominate cost. Instead all nodes
//! live in one `Vec` owned by the store, addressed by `u32` index, with a
//! free list chained through the `next` field. `prev`/`next` links are
//! indices rather than pointers, so returning a node to the pool is a
//! single index push and there is no aliasing to fight.

use smallvec::SmallVec;

use crate::property::Property;

/// Index into the interval arena.
pub(crate) type IvIdx = u32;

/// Sentinel for "no interval".
pub(crate) const NONE: IvIdx = u32::MAX;

/// One interval of a partition: a maximal run of positions sharing an
/// identical property stack.
pub(crate) struct Interval {
    pub start: u64,
    pub end: u64,
    /// Property stack, bottom to top. Every entry covers at least
    /// `start..end`.
    pub stack: SmallVec<[Property; 2]>,
    pub prev: IvIdx,
    pub next: IvIdx,
}

impl Interval {
    /// Push a property on top of the stack, counting the new reference.
    pub fn push_prop(&mut self, prop: Property) {
        prop.incr_attach();
        self.stack.push(prop);
    }

    /// Insert a property at a stack position, counting the new reference.
    pub fn insert_prop(&mut self, index: usize, prop: Property) {
        prop.incr_attach();
        self.stack.insert(index, prop);
    }

    /// Pop the topmost property, releasing this interval's reference.
    pub fn pop_prop(&mut self) -> Option<Property> {
        let prop = self.stack.pop()?;
        prop.decr_attach();
        return Some(prop);
    }

    /// Remove the given property from the stack, releasing this interval's
    /// reference. Returns false when it was not on the stack.
    pub fn remove_prop(&mut self, prop: &Property) -> bool {
        let Some(at) = self.stack.iter().position(|p| p.same_object(prop)) else {
            return false;
        };
        self.stack.remove(at).decr_attach();
        return true;
    }

    /// Drop the whole stack, releasing every reference.
    pub fn clear_stack(&mut self) {
        for prop in self.stack.drain(..) {
            prop.decr_attach();
        }
    }

    /// The topmost property, if any.
    pub fn top(&self) -> Option<&Property> {
        return self.stack.last();
    }

    /// Whether the stack references the given property.
    pub fn has_prop(&self, prop: &Property) -> bool {
        return self.stack.iter().any(|p| p.same_object(prop));
    }
}

/// The interval pool of one store.
pub(crate) struct Arena {
    slots: Vec<Interval>,
    free_head: IvIdx,
}

impl Arena {
    pub fn new() -> Arena {
        return Arena { slots: Vec::new(), free_head: NONE };
    }

    /// Allocate a node with an empty stack, reusing a freed slot before
    /// growing the arena.
    pub fn alloc(&mut self, start: u64, end: u64) -> IvIdx {
        if self.free_head != NONE {
            let idx = self.free_head;
            let slot = &mut self.slots[idx as usize];
            self.free_head = slot.next;
            slot.start = start;
            slot.end = end;
            slot.prev = NONE;
            slot.next = NONE;
            debug_assert!(slot.stack.is_empty());
            return idx;
        }
        let idx = self.slots.len();
        assert!(idx < NONE as usize, "interval arena exhausted");
        self.slots.push(Interval {
            start,
            end,
            stack: SmallVec::new(),
            prev: NONE,
            next: NONE,
        });
        return idx as IvIdx;
    }

    /// Return a node to the pool. Freeing a node that still holds
    /// properties is a logic error.
    pub fn free(&mut self, idx: IvIdx) {
        let slot = &mut self.slots[idx as usize];
        debug_assert!(slot.stack.is_empty(), "freeing interval with live stack");
        slot.prev = NONE;
        slot.next = self.free_head;
        self.free_head = idx;
    }

    /// Total slots ever allocated (live plus free), for diagnostics.
    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        return self.slots.len();
    }
}

impl std::ops::Index<IvIdx> for Arena {
    type Output = Interval;

    fn index(&self, idx: IvIdx) -> &Interval {
        return &self.slots[idx as usize];
    }
}

impl std::ops::IndexMut<IvIdx> for Arena {
    fn index_mut(&mut self, idx: IvIdx) -> &mut Interval {
        return &mut self.slots[idx as usize];
    }
}
