use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::model::DEFAULT_VECTOR_DIM;

/// Settings shared by every document of a database
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database directory; `<home>/quill/<db>.quill` when unset
    pub root: Option<PathBuf>,
    /// true = fsync after every write, false = OS buffer (faster)
    pub strict_durability: bool,
    /// Dimension of the built-in hashing embedder
    pub vector_dim: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            root: None,
            strict_durability: true,
            vector_dim: DEFAULT_VECTOR_DIM,
        }
    }
}

impl DbConfig {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn relaxed(mut self) -> Self {
        self.strict_durability = false;
        self
    }

    /// Directory holding the documents of database `db`
    pub fn resolve_root(&self, db: &str) -> Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot locate home directory".into()))?;
        Ok(home.join("quill").join(format!("{db}.quill")))
    }
}
