pub mod app;
pub mod backup;
pub mod bundler;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod sync;
pub mod transport;
pub mod utils;

pub use error::{Result, SubstrateError};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
