//! Alert list query builder.
//!
//! Builds paginated, filtered, sorted searches against the alert index with
//! before/after cursor semantics. Backward pagination reverses both the sort
//! direction and the tie-break, issues the query as an "after" search, then
//! reverses the returned hits exactly once so callers always receive pages
//! in forward-reading order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use sentinel_core::Direction;
use sentinel_store::{
    DocumentStore, MissingPosition, QueryClause, SearchHit, SearchRequest, SortClause,
};

use crate::error::DetectionError;

/// Secondary monotonic sort field used for tie-breaking.
pub const TIE_BREAK_FIELD: &str = "event.sequence";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// A validated alert list request. At most one of `page_index`,
/// `search_after`, `search_before` may be set.
#[derive(Debug, Clone)]
pub struct AlertListRequest {
    pub page_size: usize,
    pub sort: String,
    pub order: Direction,
    pub date_range: Option<DateRange>,
    /// Freeform query, interpreted opaquely by the store.
    pub query: Option<String>,
    pub filters: Vec<QueryClause>,
    pub page_index: Option<usize>,
    pub search_after: Option<Vec<Value>>,
    pub search_before: Option<Vec<Value>>,
}

impl AlertListRequest {
    /// Reject requests mixing offset paging with cursor paging, or both
    /// cursor directions at once.
    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.search_after.is_some() && self.search_before.is_some() {
            return Err(DetectionError::Validation(
                "cannot supply both after and before cursors".to_string(),
            ));
        }
        if self.page_index.is_some()
            && (self.search_after.is_some() || self.search_before.is_some())
        {
            return Err(DetectionError::Validation(
                "cannot combine page_index with a cursor".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(DetectionError::Validation(
                "page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn from_index(&self) -> Option<usize> {
        self.page_index.map(|i| i * self.page_size)
    }
}

/// One page of alerts in forward-reading order.
#[derive(Debug, Clone)]
pub struct AlertPage {
    pub hits: Vec<SearchHit>,
    pub total: u64,
    pub total_is_lower_bound: bool,
}

/// Build the match clause: alert-kind events AND date range AND freeform
/// query AND structured filters. A lone clause is returned unwrapped.
pub fn build_query(request: &AlertListRequest) -> QueryClause {
    let mut clauses = vec![QueryClause::term("event.kind", "alert")];

    if let Some(range) = &request.date_range {
        clauses.push(QueryClause::Range {
            field: "@timestamp".to_string(),
            gte: Some(Value::String(range.from.to_rfc3339())),
            lte: Some(Value::String(range.to.to_rfc3339())),
        });
    }

    if let Some(query) = &request.query {
        clauses.push(QueryClause::QueryString {
            query: query.clone(),
        });
    }

    clauses.extend(request.filters.iter().cloned());

    // Optimize: a single clause needs no bool wrapper.
    if clauses.len() > 1 {
        QueryClause::Bool { must: clauses }
    } else {
        clauses.remove(0)
    }
}

/// Build the sort: user-selected primary key plus the monotonic tie-break.
/// Missing values sort out of the active cursor window (last on ascending,
/// first on descending). `search_before` reverses both clauses.
pub fn build_sort(request: &AlertListRequest) -> Vec<SortClause> {
    let order = if request.search_before.is_some() {
        request.order.reversed()
    } else {
        request.order
    };
    let missing = match order {
        Direction::Asc => MissingPosition::Last,
        Direction::Desc => MissingPosition::First,
    };
    vec![
        SortClause::new(request.sort.clone(), order).with_missing(missing),
        SortClause::new(TIE_BREAK_FIELD, order),
    ]
}

/// Execute an alert list search.
///
/// `max_per_search` caps the page size; totals are tracked one past the cap
/// so a following page can be detected without a second round trip.
pub async fn search_alerts(
    store: &dyn DocumentStore,
    index: &str,
    request: &AlertListRequest,
    max_per_search: usize,
) -> Result<AlertPage, DetectionError> {
    request.validate()?;

    let search_after = request
        .search_before
        .clone()
        .or_else(|| request.search_after.clone());

    let store_request = SearchRequest {
        index: index.to_string(),
        query: build_query(request),
        sort: build_sort(request),
        size: request.page_size.min(max_per_search),
        from: if search_after.is_none() {
            request.from_index()
        } else {
            None
        },
        search_after,
        track_total_hits: max_per_search + 1,
    };

    let mut response = store.search(&store_request).await?;

    // Reverse exactly once so `before` pages read forward.
    if request.search_before.is_some() {
        response.hits.reverse();
    }

    if response.total.is_lower_bound {
        warn!(
            total = response.total.value,
            "total hits not counted accurately; pagination numbers may be inaccurate"
        );
    }

    Ok(AlertPage {
        hits: response.hits,
        total: response.total.value,
        total_is_lower_bound: response.total.is_lower_bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use sentinel_store::{BulkOperation, MemoryStore};

    fn request() -> AlertListRequest {
        AlertListRequest {
            page_size: 3,
            sort: "@timestamp".to_string(),
            order: Direction::Asc,
            date_range: None,
            query: None,
            filters: Vec::new(),
            page_index: None,
            search_after: None,
            search_before: None,
        }
    }

    async fn seed(store: &MemoryStore, n: u64) {
        let ops = (0..n)
            .map(|i| BulkOperation {
                index: "alerts".to_string(),
                id: Some(format!("a-{i}")),
                document: json!({
                    "@timestamp": format!("2024-01-01T00:00:{:02}Z", i),
                    "event": { "kind": "alert", "sequence": i },
                }),
            })
            .collect();
        store.bulk_index(ops).await.unwrap();
    }

    #[test]
    fn lone_clause_is_unwrapped() {
        let req = request();
        assert!(matches!(build_query(&req), QueryClause::Term { .. }));
    }

    #[test]
    fn multiple_clauses_are_anded() {
        let mut req = request();
        req.query = Some("powershell".to_string());
        match build_query(&req) {
            QueryClause::Bool { must } => assert_eq!(must.len(), 2),
            other => panic!("expected bool clause, got {other:?}"),
        }
    }

    #[test]
    fn before_reverses_sort_and_missing() {
        let mut req = request();
        req.search_before = Some(vec![json!("x"), json!(1)]);
        let sort = build_sort(&req);
        assert_eq!(sort[0].order, Direction::Desc);
        assert_eq!(sort[0].missing, Some(MissingPosition::First));
        assert_eq!(sort[1].order, Direction::Desc);
    }

    #[test]
    fn both_cursors_fail_validation() {
        let mut req = request();
        req.search_after = Some(vec![json!(1)]);
        req.search_before = Some(vec![json!(2)]);
        assert!(matches!(
            req.validate(),
            Err(DetectionError::Validation(_))
        ));
    }

    #[test]
    fn cursor_plus_page_index_fails_validation() {
        let mut req = request();
        req.search_after = Some(vec![json!(1)]);
        req.page_index = Some(1);
        assert!(req.validate().is_err());
    }

    #[tokio::test]
    async fn forward_pagination_yields_next_page() {
        let store = MemoryStore::new();
        seed(&store, 9).await;

        let req = request();
        let page1 = search_alerts(&store, "alerts", &req, 100).await.unwrap();
        assert_eq!(
            page1.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            ["a-0", "a-1", "a-2"]
        );

        let mut req2 = request();
        req2.search_after = Some(page1.hits.last().unwrap().sort.clone());
        let page2 = search_alerts(&store, "alerts", &req2, 100).await.unwrap();
        assert_eq!(
            page2.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            ["a-3", "a-4", "a-5"]
        );
    }

    #[tokio::test]
    async fn backward_pagination_yields_previous_page_forward_reading() {
        let store = MemoryStore::new();
        seed(&store, 9).await;

        // Land on page 2 first.
        let mut req = request();
        req.page_index = Some(1);
        let page2 = search_alerts(&store, "alerts", &req, 100).await.unwrap();
        assert_eq!(page2.hits[0].id, "a-3");

        // Page before the first item of page 2 is page 1, in forward order.
        let mut back = request();
        back.search_before = Some(page2.hits[0].sort.clone());
        let page1 = search_alerts(&store, "alerts", &back, 100).await.unwrap();
        assert_eq!(
            page1.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            ["a-0", "a-1", "a-2"]
        );
    }

    #[tokio::test]
    async fn offset_paging_works_without_cursors() {
        let store = MemoryStore::new();
        seed(&store, 9).await;
        let mut req = request();
        req.page_index = Some(2);
        let page = search_alerts(&store, "alerts", &req, 100).await.unwrap();
        assert_eq!(page.hits[0].id, "a-6");
        assert_eq!(page.total, 9);
        assert!(!page.total_is_lower_bound);
    }
}
