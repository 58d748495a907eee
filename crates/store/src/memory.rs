//! In-memory [`DocumentStore`] implementation.
//!
//! Backs local mode and the test suites. Sorting, cursor paging, capped
//! total-hit tracking, and duplicate-id conflicts behave like the real
//! engine's contract so the query builder and bulk writer can be exercised
//! against it directly.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use sentinel_core::Direction;

use crate::client::DocumentStore;
use crate::error::StoreError;
use crate::types::{
    BulkItem, BulkOperation, BulkResponse, GetResponse, MissingPosition, QueryClause,
    SearchHit, SearchRequest, SearchResponse, SortClause, TotalHits,
};

#[derive(Default)]
struct Indices {
    /// Documents per index, in insertion order.
    docs: HashMap<String, Vec<(String, Value)>>,
}

/// In-memory document store.
pub struct MemoryStore {
    inner: RwLock<Indices>,
    denied_indices: RwLock<HashSet<String>>,
    unmapped_timestamp_indices: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indices::default()),
            denied_indices: RwLock::new(HashSet::new()),
            unmapped_timestamp_indices: RwLock::new(HashSet::new()),
        }
    }

    /// Mark an index as unreadable for privilege checks.
    pub fn deny_read(&self, index: &str) {
        self.denied_indices
            .write()
            .expect("denied lock poisoned")
            .insert(index.to_string());
    }

    /// Mark an index as missing a timestamp mapping.
    pub fn unmap_timestamp(&self, index: &str) {
        self.unmapped_timestamp_indices
            .write()
            .expect("unmapped lock poisoned")
            .insert(index.to_string());
    }

    /// Number of documents currently held in `index`.
    pub fn count(&self, index: &str) -> usize {
        self.inner
            .read()
            .expect("store lock poisoned")
            .docs
            .get(index)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up a (possibly dotted) field path. Tries the literal key first so
/// names like `@timestamp` resolve before dot-splitting.
pub fn field_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(path) {
        return Some(v);
    }
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn matches_clause(doc: &Value, clause: &QueryClause) -> bool {
    match clause {
        QueryClause::MatchAll => true,
        QueryClause::Term { field, value } => field_value(doc, field) == Some(value),
        QueryClause::Range { field, gte, lte } => {
            let Some(v) = field_value(doc, field) else {
                return false;
            };
            if let Some(lo) = gte {
                if compare_values(Some(v), Some(lo)) == Ordering::Less {
                    return false;
                }
            }
            if let Some(hi) = lte {
                if compare_values(Some(v), Some(hi)) == Ordering::Greater {
                    return false;
                }
            }
            true
        }
        QueryClause::QueryString { query } => {
            // Opaque freeform query: substring match over the serialized doc.
            serde_json::to_string(doc)
                .map(|s| s.contains(query.as_str()))
                .unwrap_or(false)
        }
        QueryClause::Bool { must } => must.iter().all(|c| matches_clause(doc, c)),
    }
}

/// Compare two optional values; `None` ranks are resolved by the caller.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy).unwrap_or(Ordering::Equal),
            _ => match (x.as_str(), y.as_str()) {
                (Some(sx), Some(sy)) => sx.cmp(sy),
                _ => x.to_string().cmp(&y.to_string()),
            },
        },
    }
}

/// Compare two sort tuples under the given sort clauses, returning the order
/// of `a` relative to `b` in result order (not field order).
fn compare_sort_tuples(a: &[Option<Value>], b: &[Option<Value>], sort: &[SortClause]) -> Ordering {
    for (i, clause) in sort.iter().enumerate() {
        let (av, bv) = (a.get(i).and_then(|v| v.as_ref()), b.get(i).and_then(|v| v.as_ref()));

        // Missing-value placement per clause, defaulting to last-on-asc.
        let missing = clause.missing.unwrap_or(match clause.order {
            Direction::Asc => MissingPosition::Last,
            Direction::Desc => MissingPosition::First,
        });

        let ord = match (av, bv) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => match missing {
                MissingPosition::First => Ordering::Less,
                MissingPosition::Last => Ordering::Greater,
            },
            (Some(_), None) => match missing {
                MissingPosition::First => Ordering::Greater,
                MissingPosition::Last => Ordering::Less,
            },
            (Some(x), Some(y)) => {
                let base = compare_values(Some(x), Some(y));
                match clause.order {
                    Direction::Asc => base,
                    Direction::Desc => base.reverse(),
                }
            }
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn sort_tuple(doc: &Value, sort: &[SortClause]) -> Vec<Option<Value>> {
    sort.iter()
        .map(|c| field_value(doc, &c.field).cloned())
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let empty = Vec::new();
        let docs = inner.docs.get(&request.index).unwrap_or(&empty);

        let mut matched: Vec<(&String, &Value, Vec<Option<Value>>)> = docs
            .iter()
            .filter(|(_, doc)| matches_clause(doc, &request.query))
            .map(|(id, doc)| (id, doc, sort_tuple(doc, &request.sort)))
            .collect();

        matched.sort_by(|a, b| compare_sort_tuples(&a.2, &b.2, &request.sort));

        let total_matched = matched.len();
        let total = if total_matched > request.track_total_hits {
            TotalHits {
                value: request.track_total_hits as u64,
                is_lower_bound: true,
            }
        } else {
            TotalHits {
                value: total_matched as u64,
                is_lower_bound: false,
            }
        };

        // Cursor: keep only docs strictly after the cursor tuple.
        if let Some(after) = &request.search_after {
            let after_tuple: Vec<Option<Value>> = after
                .iter()
                .map(|v| if v.is_null() { None } else { Some(v.clone()) })
                .collect();
            matched.retain(|(_, _, tuple)| {
                compare_sort_tuples(tuple, &after_tuple, &request.sort) == Ordering::Greater
            });
        }

        let from = request.from.unwrap_or(0);
        let hits = matched
            .into_iter()
            .skip(from)
            .take(request.size)
            .map(|(id, doc, tuple)| SearchHit {
                id: id.clone(),
                index: request.index.clone(),
                source: doc.clone(),
                sort: tuple
                    .into_iter()
                    .map(|v| v.unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();

        Ok(SearchResponse { hits, total })
    }

    async fn bulk_index(&self, ops: Vec<BulkOperation>) -> Result<BulkResponse, StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let mut items = Vec::with_capacity(ops.len());

        for op in ops {
            let id = op.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let bucket = inner.docs.entry(op.index.clone()).or_default();

            if bucket.iter().any(|(existing, _)| *existing == id) {
                items.push(BulkItem {
                    id,
                    index: op.index,
                    status: 409,
                    error: Some("version conflict, document already exists".to_string()),
                });
                continue;
            }

            bucket.push((id.clone(), op.document));
            items.push(BulkItem {
                id,
                index: op.index,
                status: 201,
                error: None,
            });
        }

        Ok(BulkResponse { items })
    }

    async fn get(&self, index: &str, id: &str) -> Result<GetResponse, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .docs
            .get(index)
            .and_then(|bucket| bucket.iter().find(|(did, _)| did == id))
            .map(|(did, doc)| GetResponse {
                id: did.clone(),
                index: index.to_string(),
                source: doc.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(format!("{index}/{id}")))
    }

    async fn update(&self, index: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let bucket = inner
            .docs
            .get_mut(index)
            .ok_or_else(|| StoreError::NotFound(format!("{index}/{id}")))?;
        let (_, doc) = bucket
            .iter_mut()
            .find(|(did, _)| did == id)
            .ok_or_else(|| StoreError::NotFound(format!("{index}/{id}")))?;
        merge(doc, patch);
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let bucket = inner
            .docs
            .get_mut(index)
            .ok_or_else(|| StoreError::NotFound(format!("{index}/{id}")))?;
        let before = bucket.len();
        bucket.retain(|(did, _)| did != id);
        if bucket.len() == before {
            return Err(StoreError::NotFound(format!("{index}/{id}")));
        }
        Ok(())
    }

    async fn has_read_privileges(&self, indices: &[String]) -> Result<bool, StoreError> {
        let denied = self.denied_indices.read().expect("denied lock poisoned");
        Ok(indices.iter().all(|i| !denied.contains(i)))
    }

    async fn has_timestamp_field(
        &self,
        indices: &[String],
        _field: &str,
    ) -> Result<bool, StoreError> {
        let unmapped = self
            .unmapped_timestamp_indices
            .read()
            .expect("unmapped lock poisoned");
        Ok(indices.iter().all(|i| !unmapped.contains(i)))
    }
}

/// Recursive object merge; non-object values are replaced.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                match t.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        t.insert(k, v);
                    }
                }
            }
        }
        (t, p) => *t = p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(ts: &str, seq: u64) -> Value {
        json!({
            "@timestamp": ts,
            "event": { "kind": "alert", "sequence": seq },
        })
    }

    fn base_request(index: &str) -> SearchRequest {
        SearchRequest {
            index: index.to_string(),
            query: QueryClause::MatchAll,
            sort: vec![
                SortClause::new("@timestamp", Direction::Asc),
                SortClause::new("event.sequence", Direction::Asc),
            ],
            size: 10,
            from: None,
            search_after: None,
            track_total_hits: 10_000,
        }
    }

    async fn seed(store: &MemoryStore, index: &str, n: u64) {
        let ops = (0..n)
            .map(|i| BulkOperation {
                index: index.to_string(),
                id: Some(format!("doc-{i}")),
                document: doc(&format!("2024-01-01T00:00:{:02}Z", i), i),
            })
            .collect();
        store.bulk_index(ops).await.unwrap();
    }

    #[tokio::test]
    async fn search_sorts_and_pages() {
        let store = MemoryStore::new();
        seed(&store, "alerts", 5).await;

        let mut req = base_request("alerts");
        req.size = 2;
        let page1 = store.search(&req).await.unwrap();
        assert_eq!(page1.hits.len(), 2);
        assert_eq!(page1.hits[0].id, "doc-0");
        assert_eq!(page1.total.value, 5);
        assert!(!page1.total.is_lower_bound);

        req.search_after = Some(page1.hits[1].sort.clone());
        let page2 = store.search(&req).await.unwrap();
        assert_eq!(page2.hits[0].id, "doc-2");
        assert_eq!(page2.hits[1].id, "doc-3");
    }

    #[tokio::test]
    async fn search_desc_reverses_order() {
        let store = MemoryStore::new();
        seed(&store, "alerts", 3).await;

        let mut req = base_request("alerts");
        req.sort = vec![
            SortClause::new("@timestamp", Direction::Desc),
            SortClause::new("event.sequence", Direction::Desc),
        ];
        let resp = store.search(&req).await.unwrap();
        assert_eq!(resp.hits[0].id, "doc-2");
        assert_eq!(resp.hits[2].id, "doc-0");
    }

    #[tokio::test]
    async fn total_is_lower_bound_beyond_cap() {
        let store = MemoryStore::new();
        seed(&store, "alerts", 8).await;

        let mut req = base_request("alerts");
        req.track_total_hits = 5;
        let resp = store.search(&req).await.unwrap();
        assert_eq!(resp.total.value, 5);
        assert!(resp.total.is_lower_bound);
    }

    #[tokio::test]
    async fn bulk_duplicate_id_is_conflict() {
        let store = MemoryStore::new();
        seed(&store, "alerts", 1).await;

        let resp = store
            .bulk_index(vec![BulkOperation {
                index: "alerts".to_string(),
                id: Some("doc-0".to_string()),
                document: doc("2024-01-01T00:00:00Z", 0),
            }])
            .await
            .unwrap();
        assert_eq!(resp.items[0].status, 409);
        assert_eq!(store.count("alerts"), 1);
    }

    #[tokio::test]
    async fn update_merges_nested_objects() {
        let store = MemoryStore::new();
        seed(&store, "alerts", 1).await;

        store
            .update("alerts", "doc-0", json!({"alert": {"active": false}}))
            .await
            .unwrap();
        let got = store.get("alerts", "doc-0").await.unwrap();
        assert_eq!(got.source["alert"]["active"], false);
        // Existing fields survive the merge.
        assert_eq!(got.source["event"]["kind"], "alert");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("alerts", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn term_and_range_clauses_filter() {
        let store = MemoryStore::new();
        seed(&store, "alerts", 5).await;

        let mut req = base_request("alerts");
        req.query = QueryClause::Bool {
            must: vec![
                QueryClause::term("event.kind", "alert"),
                QueryClause::Range {
                    field: "event.sequence".to_string(),
                    gte: Some(json!(2)),
                    lte: Some(json!(3)),
                },
            ],
        };
        let resp = store.search(&req).await.unwrap();
        assert_eq!(resp.hits.len(), 2);
        assert_eq!(resp.hits[0].id, "doc-2");
    }

    #[tokio::test]
    async fn privilege_checks_respect_denied_sets() {
        let store = MemoryStore::new();
        store.deny_read("secret");
        assert!(!store
            .has_read_privileges(&["secret".to_string()])
            .await
            .unwrap());
        assert!(store
            .has_read_privileges(&["alerts".to_string()])
            .await
            .unwrap());
    }
}
