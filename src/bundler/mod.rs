//! Unit bundling: deterministic hashing and single-unit archives.

pub mod codec;
pub mod hash;

pub use codec::{Bundle, BundleMetadata, PackOptions, ValidationReport, validate_bundle};
pub use hash::{UnitFingerprint, hash_unit, is_transient};
