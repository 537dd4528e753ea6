//! Definition-Source Loaders

use crate::error::CatalogError;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

/// Supplies definition documents by logical name
pub trait AssetLoader: Send + Sync {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Read a whole document as UTF-8
    fn read_to_string(&self, name: &str) -> Result<String, CatalogError> {
        let io_error = |source| CatalogError::Io {
            name: name.to_string(),
            source,
        };
        let mut text = String::new();
        self.open(name)
            .map_err(io_error)?
            .read_to_string(&mut text)
            .map_err(io_error)?;
        Ok(text)
    }
}

/// Resolves names relative to a root directory
#[derive(Debug, Clone)]
pub struct DirectoryAssetLoader {
    root: PathBuf,
}

impl DirectoryAssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetLoader for DirectoryAssetLoader {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(self.root.join(name))?;
        Ok(Box::new(io::BufReader::new(file)))
    }
}

/// In-memory documents, for tests and embedded defaults
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetLoader {
    assets: HashMap<String, Vec<u8>>,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.assets.insert(name.into(), contents.into());
        self
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        match self.assets.get(name) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no asset named '{name}'"),
            )),
        }
    }
}
