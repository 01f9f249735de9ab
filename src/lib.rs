//! # quill
//!
//! Append-mostly document logs with an optional embedding index.
//!
//! A [`Database`] is a directory of documents. Each [`DocumentIndex`] keeps an
//! index registry (one MessagePack file rewritten on every push), a payload
//! segment and a vector segment, all keyed by the same uid. Records come back
//! by uid, by key/time/date/metadata filters, or by similarity search.
//!
//! ```no_run
//! use quill::{Database, DbConfig, Filter, PushOptions, SearchOptions};
//!
//! # fn main() -> quill::Result<()> {
//! let db = Database::open("notes", DbConfig::default())?;
//! let mut doc = db.document(Some("journal"))?;
//!
//! let uid = doc.push("ship the parser", PushOptions::new().key("todo"))?;
//! let todos = doc.pull_payloads(&Filter::new().key("todo"))?;
//! assert!(todos.contains_key(&uid));
//!
//! let hits = doc.search("parser", &SearchOptions::new().top_n(3))?;
//! println!("{} hits", hits.entries);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod model;
pub mod parser;
pub mod registry;
pub mod storage;
pub mod vector;

pub use catalog::{Database, DatabaseInfo};
pub use config::DbConfig;
pub use document::{DocumentIndex, DocumentInfo, Embed, PushOptions, Records, SearchOptions, Source};
pub use embedding::{EmbeddingModel, HashingEmbedder};
pub use error::{Error, Result};
pub use filter::Filter;
pub use model::{Embedding, IndexEntry, MetaValue, Metadata, Payload, PayloadRecord, SearchHits, Uid};
pub use storage::{KvStore, SegmentStore};
pub use vector::Metric;
