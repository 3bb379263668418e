//! Modules layer - Infrastructure components for external integrations
//!
//! Contains adapters for blob storage and archive packaging.

pub mod archive;
pub mod storage;
