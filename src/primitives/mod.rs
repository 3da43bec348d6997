//! Low-level primitives shared by the node format.

/// Varints and endian-aware byte cursors.
pub mod bytes;
