#![doc = include_str!("../README.md")]

pub mod bits;
mod coop;
pub mod cuckoo;
pub mod iceberg;
pub mod level;
pub mod outcome;
pub mod perm;
mod slab;

pub use cuckoo::CuckooTable;
pub use iceberg::IcebergTable;
pub use level::Geometry;
pub use level::GeometryError;
pub use outcome::full_observed;
pub use outcome::reset_full_observed;
pub use outcome::Outcome;
pub use perm::Seed;

/// Keys are unsigned integers of a per-table configured width, carried in
/// the native word.
pub type Key = u64;
