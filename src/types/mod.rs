#![forbid(unsafe_code)]
//! Shared error type for node encoding, decoding and the mutable overlay.

/// Errors surfaced by node parsing, building and overlay mutation.
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    /// The input bytes are malformed (bad tag, reserved bits set, truncated field).
    #[error("format: {0}")]
    Format(&'static str),
    /// The input is well formed but uses a variant this build does not implement.
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
    /// An in-place write did not fit the node's reserved space or encoding.
    #[error("insufficient capacity: {0}")]
    Capacity(&'static str),
    /// A caller-supplied argument violates an API precondition.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

impl NodeError {
    /// Returns true when the error only reports a lack of room for an in-place write.
    pub fn is_capacity(&self) -> bool {
        matches!(self, NodeError::Capacity(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NodeError>;
