//! Value contracts for cacheable kinds.
//!
//! A value kind is admitted into the cache by implementing [`Identifiable`].
//! Two optional capabilities refine how writes of that kind behave:
//!
//! - Relationship declaration: override [`Identifiable::related_keys`] to
//!   list the keys the value directly depends on. The cache snapshots this
//!   list on every write and uses it for change propagation and pruning.
//! - Merging: override [`Identifiable::merge`] so partial updates fold into
//!   the stored record, and mark the kind [`Mergeable`]. Every write of such
//!   a kind is then a merge against the stored value.
//!
//! Both capabilities are resolved statically per kind; the cache never
//! inspects a value at runtime to discover them.

use std::fmt::Display;

use crate::key::Key;

/// Minimal admission contract for cached values.
///
/// # Implementation Requirements
///
/// - `id()` must be stable for the lifetime of the logical record.
/// - `type_tag()` must return the same value for every instance of the kind.
///   The default uses the Rust type name, which is unique per type but not
///   stable across refactors; override it when tags are shared with other
///   systems.
/// - Values are handed to readers and observers by shared reference or by
///   clone, so a stored value must never be mutated in place.
pub trait Identifiable: Clone + Send + Sync + 'static {
    /// Identity field type. Its `Display` form becomes the key identifier.
    type Id: Display;

    /// Tag disambiguating identifiers that collide across value kinds.
    fn type_tag() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The value's own identity.
    fn id(&self) -> Self::Id;

    /// The key this value is stored under.
    fn key(&self) -> Key {
        Key::of::<Self>(&self.id())
    }

    /// Keys this value directly depends on.
    ///
    /// Computed from the value's own fields each time it is written; the
    /// result fully replaces the previously recorded edge set. Kinds without
    /// relationships keep the default empty list.
    fn related_keys(&self) -> Vec<Key> {
        Vec::new()
    }

    /// Produce the record that results from writing `incoming` over `self`.
    ///
    /// Called for every write that finds a stored value of the same kind.
    /// The default replaces the stored record outright. Mergeable kinds
    /// typically take each field from `incoming` when it is set and fall
    /// back to `self` otherwise.
    fn merge(&self, incoming: Self) -> Self {
        incoming
    }
}

/// Marker for kinds whose [`Identifiable::merge`] combines records rather
/// than replacing them.
///
/// Writes merge whether or not a kind carries the marker; it exists so APIs
/// can require merge semantics at compile time.
pub trait Mergeable: Identifiable {}
