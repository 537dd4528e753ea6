//! Catalog Error Types

use thiserror::Error;

/// A definition document that could not be read at all.
///
/// Individual malformed entries never produce this; they are logged and
/// skipped.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read asset '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed logger definition: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Malformed range table: {0}")]
    Csv(#[from] csv::Error),
}
