//! Xzero Core: error type, data directory layout, runtime configuration.

pub mod config;
pub mod error;

pub use config::{DataPaths, XzeroConfig};
pub use error::{Error, Result};
