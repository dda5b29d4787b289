//! Specialized collections keyed or indexed by [`crate::ObjectId`].

pub mod oid_array;
pub mod oid_map;
pub mod oid_set;

pub use oid_array::OidArray;
pub use oid_map::OidMap;
pub use oid_set::OidSet;
