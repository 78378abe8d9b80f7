//! Shared types for the GeoFact resolution services
//!
//! Leaf crate: geographic primitives, common error type, and TOML
//! configuration loading shared by the engine and any future members.

pub mod config;
pub mod error;
pub mod geo;

pub use error::{Error, Result};
