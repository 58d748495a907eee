//! Typed request/response model for the document-store contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sentinel_core::Direction;

/// Where documents missing the sort field land in the ordering.
///
/// The alert query builder keeps missing values out of the active cursor
/// window: last on ascending, first on descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPosition {
    First,
    Last,
}

/// One sort key with direction and missing-value placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortClause {
    pub field: String,
    pub order: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<MissingPosition>,
}

impl SortClause {
    pub fn new(field: impl Into<String>, order: Direction) -> Self {
        Self {
            field: field.into(),
            order,
            missing: None,
        }
    }

    pub fn with_missing(mut self, missing: MissingPosition) -> Self {
        self.missing = Some(missing);
        self
    }
}

/// Structured query clause. The store interprets this; callers never emit the
/// engine's native wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClause {
    MatchAll,
    /// Exact match on a single field.
    Term { field: String, value: Value },
    /// Inclusive range on a single field.
    Range {
        field: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        gte: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lte: Option<Value>,
    },
    /// Freeform query string, interpreted opaquely by the store.
    QueryString { query: String },
    /// Boolean AND of sub-clauses.
    Bool { must: Vec<QueryClause> },
}

impl QueryClause {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        QueryClause::Term {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A search request against a single index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub index: String,
    pub query: QueryClause,
    pub sort: Vec<SortClause>,
    /// Maximum hits returned.
    pub size: usize,
    /// Offset paging; mutually exclusive with `search_after` at the API layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
    /// Forward cursor: return hits strictly after this sort-key tuple.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_after: Option<Vec<Value>>,
    /// Count totals accurately only up to this many matches; beyond it the
    /// response total is a lower bound.
    pub track_total_hits: usize,
}

/// One matched document with the sort-key tuple it was ordered by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub index: String,
    pub source: Value,
    pub sort: Vec<Value>,
}

/// Total match count, possibly only known as a lower bound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    pub is_lower_bound: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total: TotalHits,
}

/// A single bulk write. Only creates are needed by this core; a create with
/// an already-used id yields a 409 item, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperation {
    pub index: String,
    /// Caller-assigned id; the store assigns one when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub document: Value,
}

/// Per-document outcome of a bulk write, HTTP-status coded:
/// 201 created, 409 duplicate, anything else is an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItem {
    pub id: String,
    pub index: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkItem>,
}

/// A document fetched by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub id: String,
    pub index: String,
    pub source: Value,
}
