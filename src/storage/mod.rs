//! Low-level storage primitives shared by the kv and codec layers.

pub mod checksum;

pub use checksum::{Checksum, ChecksumError, ChecksumType};
