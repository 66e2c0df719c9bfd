//! Metadata cache common - shared types and utilities
//!
//! This crate provides the cluster data model, configuration and error
//! definitions used by the metadata cache and its consumers.

pub mod config;
pub mod error;
pub mod types;

pub use config::MetadataCacheConfig;
pub use error::{Error, Result};
pub use types::*;
