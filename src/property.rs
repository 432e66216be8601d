//! Property objects: refcounted (key, value, range, flags) assignments.
//!
//! A [`Property`] is a shared handle (`Rc` internally). Two reference counts
//! are in play:
//!
//! 1. The `Rc` strong count keeps the object alive while anyone holds a
//!    handle, including the caller after the property has been removed from
//!    a sequence.
//! 2. `attach_count` tracks how many intervals inside a store currently
//!    reference the property. When it drops to zero the property is
//!    logically detached and its back-reference to the owning store is
//!    cleared. The back-reference is a `Weak` link, so a property never
//!    keeps a store alive on its own.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::store::StoreCore;

/// An opaque property key.
///
/// Keys are interned by an external symbol table; the store only compares
/// them. Id 0 is reserved for the nil key, which every operation requiring
/// a key rejects. The *managing* bit records that values under this key are
/// shared refcounted objects; it is carried for collaborators (serializers
/// walk it), while the store itself treats both value forms uniformly
/// through cloning.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    id: u64,
    managing: bool,
}

impl Key {
    /// The nil key. Rejected wherever a real key is required.
    pub const NIL: Key = Key { id: 0, managing: false };

    /// Create a non-managing key with the given interned id.
    pub fn new(id: u64) -> Key {
        return Key { id, managing: false };
    }

    /// Create a managing key: values under it are shared refcounted objects.
    pub fn managed(id: u64) -> Key {
        return Key { id, managing: true };
    }

    /// The interned id.
    pub fn id(&self) -> u64 {
        return self.id;
    }

    /// Whether values under this key are shared refcounted objects.
    pub fn is_managing(&self) -> bool {
        return self.managing;
    }

    /// Whether this is the nil key.
    pub fn is_nil(&self) -> bool {
        return self.id == 0;
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.managing {
            return write!(f, "Key({}, managing)", self.id);
        }
        return write!(f, "Key({})", self.id);
    }
}

/// An opaque property value, compared by identity.
///
/// The store never inspects values. Two values are "the same" for merging
/// and run computation when they share identity: equal bits for `Data`,
/// the same allocation for `Shared`. Cloning a `Shared` value is the
/// refcount increment a managing key asks for.
#[derive(Clone)]
pub enum Value {
    /// Unmanaged payload; the bits themselves are the identity.
    Data(u64),
    /// Managed shared object; the allocation is the identity.
    Shared(Rc<dyn Any>),
}

impl Value {
    /// Wrap an arbitrary value in a shared, identity-compared allocation.
    pub fn shared<T: 'static>(value: T) -> Value {
        return Value::Shared(Rc::new(value));
    }

    /// Identity comparison.
    pub fn same(&self, other: &Value) -> bool {
        return match (self, other) {
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Shared(a), Value::Shared(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
    }

    /// Borrow the payload of a `Shared` value, if it has type `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        return match self {
            Value::Shared(rc) => rc.downcast_ref::<T>(),
            Value::Data(_) => None,
        };
    }
}

impl PartialEq for Value {
    /// Identity equality, the same relation [`Value::same`] exposes.
    fn eq(&self, other: &Value) -> bool {
        return self.same(other);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            Value::Data(bits) => write!(f, "Value::Data({bits})"),
            Value::Shared(rc) => write!(f, "Value::Shared({:p})", Rc::as_ptr(rc)),
        };
    }
}

/// How a property reacts to edits of the text it covers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum Volatility {
    /// Survives edits; only shrinks or shifts with the text.
    #[default]
    None,
    /// Stripped when characters in its range are actually deleted.
    Weak,
    /// Stripped by any edit or property write touching its range.
    Strong,
}

/// Control flags of a property.
///
/// `put`/`push` create properties with default flags; flagged properties
/// enter a store through [`Property::new`] plus
/// [`PropStore::attach_property`](crate::PropStore::attach_property).
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct PropFlags {
    /// Extend backward over text inserted exactly at the property start.
    pub front_sticky: bool,
    /// Extend forward over text inserted exactly at the property end.
    pub rear_sticky: bool,
    /// Never absorb (or be absorbed by) an adjoining same-value property.
    pub no_merge: bool,
    /// Automatic stripping behavior on edits.
    pub volatility: Volatility,
}

pub(crate) struct PropInner {
    key: Key,
    value: Value,
    flags: PropFlags,
    start: Cell<u64>,
    end: Cell<u64>,
    /// Number of intervals currently referencing this property.
    attach: Cell<u32>,
    /// Weak back-reference to the owning store; cleared at attach == 0.
    owner: RefCell<Option<Weak<RefCell<StoreCore>>>>,
}

/// A refcounted handle to one property assignment.
#[derive(Clone)]
pub struct Property(pub(crate) Rc<PropInner>);

impl Property {
    /// Create a detached property. The range is set when it is attached.
    pub fn new(key: Key, value: Value, flags: PropFlags) -> Result<Property> {
        if key.is_nil() {
            return Err(Error::NilKey);
        }
        return Ok(Property::raw(key, value, flags, 0, 0, None));
    }

    pub(crate) fn raw(
        key: Key,
        value: Value,
        flags: PropFlags,
        start: u64,
        end: u64,
        owner: Option<Weak<RefCell<StoreCore>>>,
    ) -> Property {
        return Property(Rc::new(PropInner {
            key,
            value,
            flags,
            start: Cell::new(start),
            end: Cell::new(end),
            attach: Cell::new(0),
            owner: RefCell::new(owner),
        }));
    }

    /// A copy of this property over a different range; used by splits and
    /// by slice extraction. The copy starts with no referencing intervals.
    pub(crate) fn clone_with_range(
        &self,
        start: u64,
        end: u64,
        owner: Option<Weak<RefCell<StoreCore>>>,
    ) -> Property {
        return Property::raw(self.0.key, self.0.value.clone(), self.0.flags, start, end, owner);
    }

    pub fn key(&self) -> Key {
        return self.0.key;
    }

    pub fn value(&self) -> &Value {
        return &self.0.value;
    }

    pub fn flags(&self) -> PropFlags {
        return self.0.flags;
    }

    /// Start of the covered range. Stale once the property is detached.
    pub fn start(&self) -> u64 {
        return self.0.start.get();
    }

    /// End of the covered range. Stale once the property is detached.
    pub fn end(&self) -> u64 {
        return self.0.end.get();
    }

    /// Whether any interval of a store currently references this property.
    pub fn is_attached(&self) -> bool {
        return self.0.attach.get() > 0;
    }

    /// Detach this property from whatever store it is attached to.
    /// A no-op when already detached.
    pub fn detach(&self) {
        if !self.is_attached() {
            return;
        }
        if let Some(core) = self.owner_core() {
            crate::store::detach_in(&mut core.borrow_mut(), self);
        }
    }

    pub(crate) fn owner_core(&self) -> Option<Rc<RefCell<StoreCore>>> {
        return self.0.owner.borrow().as_ref()?.upgrade();
    }

    pub(crate) fn owner_weak(&self) -> Option<Weak<RefCell<StoreCore>>> {
        return self.0.owner.borrow().clone();
    }

    pub(crate) fn set_owner(&self, owner: Weak<RefCell<StoreCore>>) {
        *self.0.owner.borrow_mut() = Some(owner);
    }

    pub(crate) fn set_range(&self, start: u64, end: u64) {
        self.0.start.set(start);
        self.0.end.set(end);
    }

    pub(crate) fn set_start(&self, start: u64) {
        self.0.start.set(start);
    }

    pub(crate) fn set_end(&self, end: u64) {
        self.0.end.set(end);
    }

    pub(crate) fn attach_count(&self) -> u32 {
        return self.0.attach.get();
    }

    pub(crate) fn incr_attach(&self) {
        self.0.attach.set(self.0.attach.get() + 1);
    }

    pub(crate) fn decr_attach(&self) {
        let n = self.0.attach.get();
        debug_assert!(n > 0, "attach count underflow");
        self.0.attach.set(n - 1);
        if n == 1 {
            self.0.owner.borrow_mut().take();
        }
    }

    /// Object identity: whether both handles reference the same property.
    pub fn same_object(&self, other: &Property) -> bool {
        return Rc::ptr_eq(&self.0, &other.0);
    }

    pub(crate) fn as_ptr(&self) -> *const PropInner {
        return Rc::as_ptr(&self.0);
    }

    /// Whether `self` could be absorbed together with `right`: identical
    /// key and value, exactly adjoining ranges, neither side no-merge.
    pub(crate) fn can_merge_before(&self, right: &Property) -> bool {
        debug_assert_eq!(self.key(), right.key());
        return !self.0.flags.no_merge
            && !right.0.flags.no_merge
            && self.end() == right.start()
            && self.0.value.same(right.value());
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(
            f,
            "Property({:?}, {:?}, {}..{}, attach={})",
            self.0.key,
            self.0.value,
            self.start(),
            self.end(),
            self.0.attach.get(),
        );
    }
}
