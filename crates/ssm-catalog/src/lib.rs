//! SSM Parameter Catalogs
//!
//! Builds name-indexed catalogs of readable parameters from three sources:
//!
//! - the vendor logger definition (XML), filtered by ECU capabilities,
//!   ROM ID and target
//! - a flat range table (CSV) with descriptive metadata
//! - a hardcoded bootstrap list of core dashboard parameters
//!
//! Documents are read through an [`AssetLoader`] so callers decide whether
//! they come from disk or memory.

mod bootstrap;
mod catalog;
mod error;
mod loader;
mod logger_definition;
mod range_table;

pub use bootstrap::{bootstrap_catalog, bootstrap_parameters};
pub use catalog::{CatalogEntry, ParameterCatalog, Resolution, DEFAULT_ALIASES};
pub use error::CatalogError;
pub use loader::{AssetLoader, DirectoryAssetLoader, MemoryAssetLoader};
pub use logger_definition::{load_logger_definition, parse_logger_definition};
pub use range_table::{parse_range_table, ParameterInfo};
