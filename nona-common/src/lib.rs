//! # Nona Common Library
//!
//! Shared code for the Nona services:
//! - Error types
//! - TOML configuration loading and setting resolution

pub mod config;
pub mod error;

pub use error::{Error, Result};
