//! Self-describing binary key-value nodes and a mutable overlay built from them.
//!
//! A [`storage::node::Node`] is a zero-copy view over an encoded buffer: header,
//! optional offset index and a block of length-prefixed entries. An
//! [`storage::overlay::Overlay`] pairs a sorted, indexed clean node with an unsorted
//! dirty node to accept writes.

#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::node::{build, BuildOptions, Node, NodeSlot};
pub use storage::overlay::{Overlay, OverlayOptions};
pub use types::{NodeError, Result};
