//! Record selectors
//!
//! A [`Filter`] names records either directly by uid or through criteria on
//! their index entries. Criteria combine with AND; a missing criterion always
//! matches. Empty strings and empty maps count as missing.

use std::collections::BTreeMap;

use crate::model::{IndexEntry, MetaValue, Metadata, Uid};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub uids: Option<Vec<Uid>>,
    pub key: Option<String>,
    /// `HH[:MM[:SS]]` prefix
    pub time: Option<String>,
    /// `DD[-MM[-YYYY]]` prefix
    pub date: Option<String>,
    /// Metadata equality, satisfied when ANY pair agrees
    pub metadata: Option<Metadata>,
    /// Content search inside payload data (not supported yet)
    pub data: Option<BTreeMap<String, String>>,
}

impl Filter {
    /// Empty filter (selects everything)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uid(mut self, uid: impl Into<Uid>) -> Self {
        self.uids.get_or_insert_with(Vec::new).push(uid.into());
        self
    }

    pub fn uids<I, S>(mut self, uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Uid>,
    {
        self.uids
            .get_or_insert_with(Vec::new)
            .extend(uids.into_iter().map(Into::into));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Add a metadata condition
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(field.into(), value.into());
        self
    }

    /// Add a payload content condition
    pub fn where_data(mut self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.data
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), needle.into());
        self
    }

    pub fn uid_list(&self) -> Option<&[Uid]> {
        self.uids.as_deref()
    }

    /// True when neither uids nor any criterion is given
    pub fn is_empty(&self) -> bool {
        self.uids.is_none() && !self.has_criteria() && !self.has_data_criteria()
    }

    /// True when key/time/date/metadata narrow the selection
    pub fn has_criteria(&self) -> bool {
        present(&self.key).is_some()
            || present(&self.time).is_some()
            || present(&self.date).is_some()
            || self.metadata.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn has_data_criteria(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Check an index entry against key/time/date/metadata
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        present(&self.key).map_or(true, |k| k == entry.key)
            && present(&self.time).map_or(true, |t| match_prefix(t, &entry.time, ':'))
            && present(&self.date).map_or(true, |d| match_prefix(d, &entry.date, '-'))
            && self
                .metadata
                .as_ref()
                .filter(|m| !m.is_empty())
                .map_or(true, |m| match_any(m, entry.metadata.as_ref()))
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// `query` split on `sep` must equal the leading components of `stored`.
pub fn match_prefix(query: &str, stored: &str, sep: char) -> bool {
    let mut stored_parts = stored.split(sep);
    query
        .split(sep)
        .all(|q| stored_parts.next().is_some_and(|s| s == q))
}

/// At least one query pair has an equal value in `metadata`.
pub fn match_any(query: &Metadata, metadata: Option<&Metadata>) -> bool {
    let Some(metadata) = metadata else {
        return false;
    };
    query
        .iter()
        .any(|(field, expected)| metadata.get(field).is_some_and(|v| v.matches(expected)))
}
