//! Error types for the property store.

use thiserror::Error;

/// Errors reported by public store operations.
///
/// Only caller mistakes are reported here: bad positions, the nil key,
/// attaching an already-attached property. Structural problems (a partition
/// that no longer tiles the sequence, adjacent intervals with identical
/// stacks) are internal defects guarded by debug assertions and
/// [`PropStore::check_invariants`](crate::PropStore::check_invariants),
/// never an error variant.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("position {pos} out of bounds for sequence of length {len}")]
    Position { pos: u64, len: u64 },

    #[error("range {from}..{to} invalid for sequence of length {len}")]
    Range { from: u64, to: u64, len: u64 },

    #[error("nil key where a property key is required")]
    NilKey,

    #[error("property is already attached to a sequence")]
    Attached,

    #[error("slice length {got} does not match insertion length {expected}")]
    SliceLen { expected: u64, got: u64 },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
