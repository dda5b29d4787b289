//! The pack-file builder core: delta search, write-order planning, and the
//! streaming pack writer.
//!
//! Callers insert objects (directly, or transitively through a tree) into a
//! [`PackBuilder`], then call one of the emit entry points. Everything in
//! between — candidate selection, delta search, and write ordering — is
//! private machinery; see [`builder`] for the public surface.

pub mod builder;
pub mod candidates;
pub mod config;
pub mod delta;
pub mod entry;
pub mod search;
pub mod sink;
pub mod store;
pub mod table;
pub mod write_order;
pub mod writer;

mod parallel;

pub use builder::PackBuilder;
pub use config::PackConfig;
pub use store::{MemoryStore, ObjectStore, StoredObject};

use git_hash::ObjectId;

/// Errors that can occur while building or writing a pack.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// The backing store could not supply an object by id.
    #[error("store read failed for {0}")]
    StoreRead(ObjectId),

    /// A consistency check failed: sizes disagreed, write-order coverage was
    /// incomplete, or similar.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A delta instruction stream was malformed.
    #[error("invalid delta at offset {offset}: {reason}")]
    InvalidDelta { offset: u64, reason: String },

    /// Memory allocation failed. Fatal everywhere except while building a
    /// source-side delta index, where callers downgrade this to "skip delta".
    #[error("allocation failed: {0}")]
    Alloc(String),

    /// The sink rejected bytes, or some other I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A worker thread could not be spawned, or panicked.
    #[error("worker thread failure: {0}")]
    Thread(String),

    /// A configuration value was negative, zero where a positive value is
    /// required, or otherwise malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Object(#[from] git_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] git_hash::HashError),
}

/// A single variable-length-encoded pack entry's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackEntryType {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta referencing its base by 20-byte id. This is the only delta
    /// encoding this builder ever emits; offset-encoded deltas are a
    /// non-goal (see the crate's design notes).
    RefDelta { base_oid: ObjectId },
}

impl PackEntryType {
    pub fn to_object_type(self) -> Option<git_object::ObjectType> {
        use git_object::ObjectType;
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::RefDelta { .. } => None,
        }
    }

    pub fn type_number(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::RefDelta { .. } => 7,
        }
    }
}

/// Pack format constants.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_SIZE: usize = 12;

/// Compile-time default window and max chain depth (see `PackConfig`).
pub const DEFAULT_WINDOW: usize = 10;
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Hard ceiling on chain depth regardless of configuration, matching the
/// reader side's sanity bound.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 512;
