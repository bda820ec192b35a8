//! Composite cache keys.
//!
//! A [`Key`] names exactly one stored value. It pairs a type tag, which keeps
//! identifiers of unrelated value kinds apart, with the string form of the
//! value's own identity field. Keys are the unit of storage, of relationship
//! edges and of observation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::Identifiable;

/// Separator used by the `Display` form of a key.
const SEPARATOR: char = ':';

/// Identity of a stored value: `(type_tag, identifier)`.
///
/// # Design
///
/// The fields are private so a key can only be built through [`Key::new`],
/// [`Key::of`] or [`Identifiable::key`]. Two keys are equal iff both the
/// tag and the identifier match. Keys carry no ordering; the cache only
/// ever hashes and compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    type_tag: String,
    identifier: String,
}

impl Key {
    /// Create a key from a raw type tag and identifier.
    pub fn new(type_tag: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            identifier: identifier.into(),
        }
    }

    /// Create the key under which a value of kind `T` with identity `id` is stored.
    pub fn of<T: Identifiable>(id: &T::Id) -> Self {
        Self::new(T::type_tag(), id.to_string())
    }

    /// Get the type tag of this key.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Get the identifier of this key.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether this key names a value of kind `T`.
    pub fn is_kind<T: Identifiable>(&self) -> bool {
        self.type_tag == T::type_tag()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.type_tag, SEPARATOR, self.identifier)
    }
}
