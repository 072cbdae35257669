//! Configuration models and loading.
//!
//! This crate owns the Banter config schema, validation, and the JSON5
//! file loading used by the server binary.

mod error;
mod loader;
mod model;

/// Public error type returned by config loading and validation APIs.
pub use error::ConfigError;
/// Configuration schema models.
pub use model::*;
