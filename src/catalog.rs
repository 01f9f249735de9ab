use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::config::DbConfig;
use crate::document::{DocumentIndex, INDEX_EXTENSION};
use crate::embedding::{EmbeddingModel, HashingEmbedder};
use crate::error::{Error, Result};

/// Named database: a directory of documents sharing one embedding model
pub struct Database {
    name: String,
    root: PathBuf,
    model: Arc<dyn EmbeddingModel>,
    config: DbConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub db: String,
    pub db_path: PathBuf,
    pub vec_model: String,
}

impl Database {
    /// Open `name` with the built-in hashing embedder.
    pub fn open(name: &str, config: DbConfig) -> Result<Self> {
        let model = Arc::new(HashingEmbedder::new(config.vector_dim)?);
        Self::with_model(name, config, model)
    }

    pub fn with_model(name: &str, config: DbConfig, model: Arc<dyn EmbeddingModel>) -> Result<Self> {
        let root = config.resolve_root(name)?;
        fs::create_dir_all(&root)?;
        info!(db = name, path = %root.display(), model = model.name(), "Opened database");
        Ok(Self {
            name: name.to_string(),
            root,
            model,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Open a document, defaulting to today's log (`log-[DD_MM_YYYY]`).
    pub fn document(&self, name: Option<&str>) -> Result<DocumentIndex> {
        let name = match name {
            Some(name) => {
                validate_doc_name(name)?;
                name.to_string()
            }
            None => default_doc_name(),
        };
        DocumentIndex::open(
            &self.root.join(&name),
            &name,
            self.model.clone(),
            &self.config,
        )
    }

    /// Names of documents that have an index file, sorted.
    pub fn documents(&self) -> Result<Vec<String>> {
        let mut docs = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = dir_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if dir_entry
                .path()
                .join(format!("{name}.{INDEX_EXTENSION}"))
                .is_file()
            {
                docs.push(name);
            }
        }
        docs.sort();
        Ok(docs)
    }

    pub fn info(&self) -> DatabaseInfo {
        DatabaseInfo {
            db: self.name.clone(),
            db_path: self.root.clone(),
            vec_model: self.model.name().to_string(),
        }
    }
}

pub fn default_doc_name() -> String {
    Local::now().format("log-[%d_%m_%Y]").to_string()
}

fn validate_doc_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.contains(['/', '\\']) {
        "name contains a path separator"
    } else {
        return Ok(());
    };
    Err(Error::InvalidArgument(format!("invalid document name '{name}': {reason}")))
}
