//! Workspace inventory: discovering the content units a workspace holds.

pub mod scanner;

pub use scanner::{
    ContentUnit, DESCRIPTOR_FILE, Descriptor, Selected, UnitSelection, discover_units,
    is_valid_unit_name,
};
