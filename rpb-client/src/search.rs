//! # Search Queries
//!
//! Purpose: Run a full-text query against a store-side search index and
//! return each matching document as a field map.

use std::collections::BTreeMap;

use rpb_common::messages::{RpbSearchQueryReq, RpbSearchQueryResp};
use tracing::debug;

use crate::client::Client;
use crate::error::ClientResult;
use crate::object::{lossy, non_empty};

/// Rows returned when the query leaves `rows` at zero.
pub const DEFAULT_ROWS: u32 = 10;

/// A search query. Only `q` and `index` are required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Search {
    pub q: String,
    pub index: String,
    pub rows: u32,
    pub start: u32,
    pub sort: String,
    pub filter: String,
    pub df: String,
    pub op: String,
    pub presort: String,
    /// Fields to return; empty returns every stored field.
    pub fields: Vec<String>,
}

impl Search {
    pub fn new(index: impl Into<String>, q: impl Into<String>) -> Self {
        Search {
            q: q.into(),
            index: index.into(),
            ..Search::default()
        }
    }

    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_start(mut self, start: u32) -> Self {
        self.start = start;
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = sort.into();
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    fn to_request(&self) -> RpbSearchQueryReq {
        let rows = if self.rows == 0 { DEFAULT_ROWS } else { self.rows };
        RpbSearchQueryReq {
            q: self.q.as_bytes().to_vec(),
            index: self.index.as_bytes().to_vec(),
            rows: Some(rows),
            start: Some(self.start),
            sort: non_empty(self.sort.as_bytes()),
            filter: non_empty(self.filter.as_bytes()),
            df: non_empty(self.df.as_bytes()),
            op: non_empty(self.op.as_bytes()),
            fl: self.fields.iter().map(|f| f.as_bytes().to_vec()).collect(),
            presort: non_empty(self.presort.as_bytes()),
        }
    }
}

/// Documents matched by a search plus the store's scoring summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub docs: Vec<BTreeMap<String, Vec<u8>>>,
    pub max_score: f32,
    pub num_found: u32,
}

impl Client {
    pub fn search(&self, search: &Search) -> ClientResult<SearchResult> {
        let resp: RpbSearchQueryResp = self.executor().request(&search.to_request())?;
        let docs: Vec<BTreeMap<String, Vec<u8>>> = resp
            .docs
            .into_iter()
            .map(|doc| {
                doc.fields
                    .into_iter()
                    .map(|pair| (lossy(pair.key), pair.value.unwrap_or_default()))
                    .collect()
            })
            .collect();
        debug!(index = %search.index, docs = docs.len(), "search complete");
        Ok(SearchResult {
            docs,
            max_score: resp.max_score.unwrap_or_default(),
            num_found: resp.num_found.unwrap_or_default(),
        })
    }
}
