//! Node storage format and the overlay layered on top of it.

/// Immutable node format: parsing, building and lookup.
///
/// Also hosts [`node::NodeSlot`], an owned node with tombstones and in-place appends.
pub mod node;

/// Clean/dirty overlay accepting puts and deletes.
pub mod overlay;
