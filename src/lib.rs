//! Interval-based property storage for editable sequences.
//!
//! A [`PropStore`] annotates the positions of a text-like sequence with
//! stacks of keyed values, the way an editor attaches faces and markers to
//! buffer text. The store keeps one interval chain per key, splitting and
//! merging intervals as properties are written and as the underlying
//! sequence is edited around them.
//!
//! # Quick Start
//!
//! ```
//! use textprop::{Key, PropStore, Value};
//!
//! let face = Key::new(1);
//! let mut store = PropStore::new(13);
//!
//! // Style a word, then stack a highlight over part of it.
//! store.put(0, 5, face, Value::Data(1)).unwrap();
//! store.push(2, 5, face, Value::Data(2)).unwrap();
//! assert!(store.get(3, face).unwrap().unwrap().same(&Value::Data(2)));
//!
//! // Report an edit of the sequence; the properties follow the text.
//! store.delete(0, 2).unwrap();
//! assert_eq!(store.prop_range(1, face, false).unwrap(), (0, 3, 2));
//! ```

pub mod error;
pub mod property;
pub mod store;

mod arena;
mod partition;

pub use error::{Error, Result};
pub use property::{Key, PropFlags, Property, Value, Volatility};
pub use store::{PropSlice, PropStore};
