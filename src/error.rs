//! # Errors
//!
//! Every fallible operation in this crate returns this single [`Error`]
//! type. There is no per-module error hierarchy: a conflict, a malformed
//! message and a store failure are all things a caller handling a
//! transaction result needs to tell apart, so they live in one enum.
use thiserror::Error as ThisError;

/// Errors produced by the object database core.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A write's precondition key or index was mutated by a later
    /// transaction than the one the writer read from.
    #[error("transaction conflict")]
    Conflict,
    /// A message referenced a schema the channel never defined.
    #[error("unknown schema `{0}`")]
    UnknownSchema(String),
    /// A message referenced a type not present in the schema definition.
    #[error("unknown type `{1}` in schema `{0}`")]
    UnknownType(String, String),
    /// A subscribe referenced a field that is not declared as an index of
    /// the type.
    #[error("field `{2}` is not an index of `{0}.{1}`")]
    UnknownIndex(String, String, String),
    /// A client message could not be interpreted.
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),
    /// The key-value store reported a failure applying a batch of writes.
    #[error("store error: {0}")]
    Store(String),
    /// The outbound channel for a connection is closed; sends to it are
    /// dropped rather than propagated as fatal.
    #[error("channel closed")]
    ChannelClosed,
    /// An internal invariant was violated. Any occurrence is a bug, not a
    /// client-triggerable condition.
    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
}
