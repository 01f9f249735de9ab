//! One logical document: index registry, payload store and vector store
//!
//! All three are keyed by the same uid. A push encodes its vector up front,
//! then commits the index entry (flushing the registry), then the payload,
//! then the vector if one was requested. A crash between those steps leaves
//! an index entry without a payload; readers skip such entries and
//! [`DocumentIndex::orphans`] lists them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Local;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DbConfig;
use crate::embedding::EmbeddingModel;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::model::{
    new_uid, Embedding, IndexEntry, Metadata, Payload, PayloadRecord, SearchHits, Uid,
};
use crate::registry::{DocReg, Registry, RegistryFile};
use crate::storage::{KvStore, SegmentStore};
use crate::vector::Metric;

pub const PAYLOAD_FILE: &str = "data.seg";
pub const VECTOR_FILE: &str = "vec.seg";
pub const INDEX_EXTENSION: &str = "index";

/// Store a pull reads from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Source {
    #[default]
    Payload,
    Vector,
    Index,
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "payload" | "data" | "data.oxd" => Ok(Source::Payload),
            "vector" | "vec" | "vec.oxd" => Ok(Source::Vector),
            "index" | ".index" => Ok(Source::Index),
            other => Err(Error::InvalidArgument(format!(
                "source should be one of payload, vector, index, not '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Payload => "payload",
            Source::Vector => "vector",
            Source::Index => "index",
        })
    }
}

/// Records returned by [`DocumentIndex::pull`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Records {
    Payload(IndexMap<Uid, PayloadRecord>),
    Vector(IndexMap<Uid, Embedding>),
    Index(IndexMap<Uid, IndexEntry>),
}

impl Records {
    pub fn len(&self) -> usize {
        match self {
            Records::Payload(m) => m.len(),
            Records::Vector(m) => m.len(),
            Records::Index(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn uids(&self) -> Vec<&Uid> {
        match self {
            Records::Payload(m) => m.keys().collect(),
            Records::Vector(m) => m.keys().collect(),
            Records::Index(m) => m.keys().collect(),
        }
    }
}

/// How a push obtains its vector
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Embed {
    /// No vector record
    Skip,
    /// Encode the data with the document's model
    #[default]
    Encode,
    /// Store this vector as-is
    Precomputed(Embedding),
}

impl From<bool> for Embed {
    fn from(embed: bool) -> Self {
        if embed {
            Embed::Encode
        } else {
            Embed::Skip
        }
    }
}

impl From<Embedding> for Embed {
    fn from(vector: Embedding) -> Self {
        Embed::Precomputed(vector)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOptions {
    pub embed: Embed,
    pub description: Option<String>,
    pub metadata: Option<Metadata>,
    pub key: Option<String>,
    /// Overrides the tag derived from the payload variant
    pub data_type: Option<String>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embed(mut self, embed: impl Into<Embed>) -> Self {
        self.embed = embed.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub top_n: usize,
    pub metric: Metric,
    /// Restricts the candidate set
    pub filter: Filter,
    pub include_embeddings: bool,
    /// Vectors to rank instead of the ones selected by `filter`
    pub candidates: Option<IndexMap<Uid, Embedding>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            metric: Metric::default(),
            filter: Filter::default(),
            include_embeddings: false,
            candidates: None,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn include_embeddings(mut self, include: bool) -> Self {
        self.include_embeddings = include;
        self
    }

    pub fn candidates(mut self, candidates: IndexMap<Uid, Embedding>) -> Self {
        self.candidates = Some(candidates);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub doc_name: String,
    pub doc_path: PathBuf,
    pub doc_reg: DocReg,
}

pub struct DocumentIndex {
    name: String,
    dir: PathBuf,
    registry_file: RegistryFile,
    registry: Registry,
    payloads: Box<dyn KvStore<PayloadRecord>>,
    vectors: Box<dyn KvStore<Embedding>>,
    model: Arc<dyn EmbeddingModel>,
}

impl fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("entries", &self.registry.doc_reg.entry)
            .field("model", &self.model.name())
            .finish()
    }
}

impl DocumentIndex {
    /// Open (or create) the document `name` stored in `dir`.
    pub fn open(
        dir: &Path,
        name: &str,
        model: Arc<dyn EmbeddingModel>,
        config: &DbConfig,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let payloads = SegmentStore::<PayloadRecord>::open(
            &dir.join(PAYLOAD_FILE),
            config.strict_durability,
        )?;
        let vectors =
            SegmentStore::<Embedding>::open(&dir.join(VECTOR_FILE), config.strict_durability)?;
        Self::with_stores(
            dir,
            name,
            model,
            config,
            Box::new(payloads),
            Box::new(vectors),
        )
    }

    /// Open with caller-supplied payload and vector backends.
    pub fn with_stores(
        dir: &Path,
        name: &str,
        model: Arc<dyn EmbeddingModel>,
        config: &DbConfig,
        payloads: Box<dyn KvStore<PayloadRecord>>,
        vectors: Box<dyn KvStore<Embedding>>,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let registry_file = RegistryFile::new(
            dir.join(format!("{name}.{INDEX_EXTENSION}")),
            config.strict_durability,
        );
        let mut registry = registry_file.load()?;

        let current = model.name().to_string();
        match &registry.doc_reg.vec_model {
            Some(stored) if *stored != current && !vectors.is_empty() => {
                return Err(Error::ModelMismatch {
                    stored: stored.clone(),
                    current,
                });
            }
            Some(stored) if *stored == current => {}
            _ => {
                registry.doc_reg.vec_model = Some(current);
                registry_file.save(&registry)?;
            }
        }

        info!(
            doc = name,
            path = %dir.display(),
            entries = registry.doc_reg.entry,
            model = model.name(),
            "Opened document"
        );

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            registry_file,
            registry,
            payloads,
            vectors,
            model,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn model(&self) -> &dyn EmbeddingModel {
        self.model.as_ref()
    }

    pub fn info(&self) -> DocumentInfo {
        DocumentInfo {
            doc_name: self.name.clone(),
            doc_path: self.dir.clone(),
            doc_reg: self.registry.doc_reg.clone(),
        }
    }

    /// Log `data` and return its uid.
    pub fn push(&mut self, data: impl Into<Payload>, opts: PushOptions) -> Result<Uid> {
        let data = data.into();
        if data.is_empty() {
            return Err(Error::InvalidInput("no data provided for logging".into()));
        }
        if matches!(&opts.embed, Embed::Precomputed(v) if v.is_empty()) {
            return Err(Error::InvalidInput("precomputed embedding is empty".into()));
        }

        let uid = new_uid();
        let data_type = opts
            .data_type
            .unwrap_or_else(|| data.kind().to_string());
        let entry = IndexEntry::new(
            uid.clone(),
            &self.name,
            opts.key,
            opts.metadata,
            data_type,
            Local::now(),
        );

        // Encode before committing so a failing model leaves nothing behind.
        let vector = match opts.embed {
            Embed::Skip => None,
            Embed::Encode => Some(self.model.encode(&data)?),
            Embed::Precomputed(v) => Some(v),
        };
        let embedded = vector.is_some();

        self.commit_entry(entry)?;

        self.payloads.set(
            &uid,
            &PayloadRecord {
                data,
                description: opts.description,
            },
        )?;
        if let Some(vector) = vector {
            self.vectors.set(&uid, &vector)?;
        }

        debug!(doc = %self.name, uid = %uid, embedded, "Pushed record");
        Ok(uid)
    }

    fn commit_entry(&mut self, entry: IndexEntry) -> Result<()> {
        let uid = entry.uid.clone();
        self.registry.insert(entry);
        if let Err(e) = self.registry_file.save(&self.registry) {
            self.registry.undo_insert(&uid);
            return Err(e);
        }
        Ok(())
    }

    /// Read records from `source`.
    ///
    /// An empty filter returns the whole store. Explicit uids take precedence
    /// over other criteria; uids without a record are left out.
    pub fn pull(&self, filter: &Filter, source: Source) -> Result<Records> {
        Ok(match source {
            Source::Payload => Records::Payload(self.pull_payloads(filter)?),
            Source::Vector => Records::Vector(self.pull_vectors(filter)?),
            Source::Index => Records::Index(self.pull_index(filter)?),
        })
    }

    pub fn pull_payloads(&self, filter: &Filter) -> Result<IndexMap<Uid, PayloadRecord>> {
        match self.selection(filter)? {
            None => self.payloads.load_all(),
            Some(uids) => lookup(self.payloads.as_ref(), &uids),
        }
    }

    pub fn pull_vectors(&self, filter: &Filter) -> Result<IndexMap<Uid, Embedding>> {
        match self.selection(filter)? {
            None => self.vectors.load_all(),
            Some(uids) => lookup(self.vectors.as_ref(), &uids),
        }
    }

    pub fn pull_index(&self, filter: &Filter) -> Result<IndexMap<Uid, IndexEntry>> {
        let index = &self.registry.index;
        Ok(match self.selection(filter)? {
            None => index.clone(),
            Some(uids) => uids
                .into_iter()
                .filter_map(|uid| index.get(&uid).cloned().map(|e| (uid, e)))
                .collect(),
        })
    }

    /// `None` selects everything, otherwise the uids to look up.
    fn selection(&self, filter: &Filter) -> Result<Option<Vec<Uid>>> {
        if filter.has_data_criteria() {
            return Err(Error::Unsupported("where_data content search"));
        }
        if let Some(uids) = filter.uid_list() {
            return Ok(Some(uids.to_vec()));
        }
        if filter.has_criteria() {
            return Ok(Some(self.filter_uids(filter)));
        }
        Ok(None)
    }

    /// Uids of index entries matching every criterion, in push order.
    pub fn filter_uids(&self, filter: &Filter) -> Vec<Uid> {
        self.registry
            .index
            .iter()
            .filter(|(_, entry)| filter.matches(entry))
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// Rank stored vectors against `query` and hydrate the best matches.
    ///
    /// A non-empty `opts.candidates` replaces the filtered vector pull.
    pub fn search(&self, query: impl Into<Payload>, opts: &SearchOptions) -> Result<SearchHits> {
        let query = query.into();
        let candidates = match &opts.candidates {
            Some(candidates) if !candidates.is_empty() => candidates.clone(),
            _ => self.pull_vectors(&opts.filter)?,
        };
        if candidates.is_empty() {
            return Ok(empty_hits(opts));
        }

        let (dataset_uids, dataset): (Vec<Uid>, Vec<Embedding>) = candidates.into_iter().unzip();
        let ranked = self
            .model
            .search(&query, &dataset, opts.top_n, opts.metric)?;

        let picked: Vec<usize> = ranked
            .into_iter()
            .filter(|&pos| {
                let in_range = pos < dataset_uids.len();
                if !in_range {
                    warn!(position = pos, candidates = dataset_uids.len(), "Model returned out-of-range position");
                }
                in_range
            })
            .collect();

        let uids: Vec<Uid> = picked.iter().map(|&pos| dataset_uids[pos].clone()).collect();
        let payloads = lookup(self.payloads.as_ref(), &uids)?;

        let mut hits = empty_hits(opts);
        for pos in picked {
            let uid = &dataset_uids[pos];
            let (Some(record), Some(entry)) = (payloads.get(uid), self.registry.get(uid)) else {
                warn!(doc = %self.name, uid = %uid, "Skipping hit without payload or index entry");
                continue;
            };
            hits.uid.push(uid.clone());
            hits.data.push(record.data.clone());
            hits.description.push(record.description.clone());
            hits.index.push(entry.clone());
            if let Some(embeddings) = hits.embeddings.as_mut() {
                embeddings.push(dataset[pos].clone());
            }
        }
        hits.entries = hits.uid.len();

        debug!(doc = %self.name, metric = %opts.metric, hits = hits.entries, "Search complete");
        Ok(hits)
    }

    /// Indexed uids whose payload record is missing.
    pub fn orphans(&self) -> Result<Vec<Uid>> {
        let mut orphans = Vec::new();
        for uid in self.registry.index.keys() {
            if self.payloads.get(uid)?.is_none() {
                orphans.push(uid.clone());
            }
        }
        Ok(orphans)
    }

    /// Persist the registry and sync both stores.
    pub fn flush(&mut self) -> Result<()> {
        self.registry_file.save(&self.registry)?;
        self.payloads.flush()?;
        self.vectors.flush()
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        debug!(doc = %self.name, "Closed document");
        Ok(())
    }
}

fn empty_hits(opts: &SearchOptions) -> SearchHits {
    SearchHits {
        embeddings: opts.include_embeddings.then(Vec::new),
        ..SearchHits::default()
    }
}

fn lookup<V>(store: &dyn KvStore<V>, uids: &[Uid]) -> Result<IndexMap<Uid, V>> {
    let mut found = IndexMap::with_capacity(uids.len());
    for uid in uids {
        if let Some(value) = store.get(uid)? {
            found.insert(uid.clone(), value);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> DocumentIndex {
        let config = DbConfig::default().relaxed();
        DocumentIndex::open(
            &temp.path().join("notes"),
            "notes",
            Arc::new(HashingEmbedder::default()),
            &config,
        )
        .unwrap()
    }

    #[test]
    fn test_source_parse() {
        assert_eq!("payload".parse::<Source>().unwrap(), Source::Payload);
        assert_eq!("vec.oxd".parse::<Source>().unwrap(), Source::Vector);
        assert_eq!(".index".parse::<Source>().unwrap(), Source::Index);
        let err = "blob".parse::<Source>().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_embed_from() {
        assert_eq!(Embed::from(true), Embed::Encode);
        assert_eq!(Embed::from(false), Embed::Skip);
        assert_eq!(Embed::from(vec![1.0]), Embed::Precomputed(vec![1.0]));
    }

    #[test]
    fn test_open_records_model() {
        let temp = TempDir::new().unwrap();
        let doc = open(&temp);
        assert_eq!(doc.registry().doc_reg.vec_model.as_deref(), Some("hashing-128"));
        assert_eq!(doc.registry().doc_reg.entry, 0);
        assert!(temp.path().join("notes").join("notes.index").exists());
    }

    #[test]
    fn test_push_sets_defaults() {
        let temp = TempDir::new().unwrap();
        let mut doc = open(&temp);

        let uid = doc.push(7, PushOptions::new().embed(false)).unwrap();
        let entry = doc.registry().get(&uid).unwrap();
        assert_eq!(entry.key, "key");
        assert_eq!(entry.doc, "notes");
        assert_eq!(entry.data_type, "integer");
        assert!(entry.metadata.is_none());

        let uid = doc
            .push("x", PushOptions::new().data_type("markdown").key("k"))
            .unwrap();
        let entry = doc.registry().get(&uid).unwrap();
        assert_eq!(entry.data_type, "markdown");
        assert_eq!(entry.key, "k");
    }

    #[test]
    fn test_empty_precomputed_vector_commits_nothing() {
        let temp = TempDir::new().unwrap();
        let mut doc = open(&temp);

        let err = doc
            .push("data", PushOptions::new().embed(Vec::<f32>::new()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(doc.registry().doc_reg.entry, 0);
    }

    #[test]
    fn test_where_data_is_unsupported() {
        let temp = TempDir::new().unwrap();
        let doc = open(&temp);
        let err = doc
            .pull(&Filter::new().where_data("text", "x"), Source::Payload)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_failed_index_save_leaves_registry_unchanged() {
        let temp = TempDir::new().unwrap();
        let mut doc = open(&temp);
        doc.push("before", PushOptions::new()).unwrap();

        let index_path = temp.path().join("notes").join("notes.index");
        fs::remove_file(&index_path).unwrap();
        fs::create_dir(&index_path).unwrap();

        let err = doc.push("after", PushOptions::new()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(doc.registry().doc_reg.entry, 1);
        assert_eq!(doc.registry().len(), 1);
        assert_eq!(doc.pull_payloads(&Filter::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_flush_and_close() {
        let temp = TempDir::new().unwrap();
        let mut doc = open(&temp);
        doc.push("kept", PushOptions::new()).unwrap();
        doc.flush().unwrap();
        doc.close().unwrap();

        let doc = open(&temp);
        assert_eq!(doc.registry().doc_reg.entry, 1);
    }
}
