//! Alert list and detail endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use sentinel_core::Direction;
use sentinel_detection::{
    decode_cursor, encode_cursor, search_alerts, AlertListRequest, DateRange,
};
use sentinel_store::{field_value, QueryClause};

use crate::api::{bad_request, map_store_error};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    pub page_size: Option<usize>,
    pub page_index: Option<usize>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub query: Option<String>,
    /// JSON-encoded array of structured filter clauses.
    pub filters: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Serialize)]
pub struct AlertItem {
    pub id: String,
    pub sort: Vec<Value>,
    #[serde(flatten)]
    pub document: Map<String, Value>,
}

#[derive(Serialize)]
pub struct AlertListResponse {
    pub alerts: Vec<AlertItem>,
    pub total: u64,
    pub total_is_lower_bound: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

fn parse_order(raw: Option<&str>, default: &str) -> Result<Direction, (StatusCode, String)> {
    match raw.unwrap_or(default) {
        "asc" => Ok(Direction::Asc),
        "desc" => Ok(Direction::Desc),
        other => Err(bad_request(format!("invalid order '{other}'"))),
    }
}

fn build_request(
    state: &AppState,
    params: &AlertListParams,
) -> Result<AlertListRequest, (StatusCode, String)> {
    let defaults = &state.config.alerts;
    let order = parse_order(params.order.as_deref(), &defaults.default_order)?;

    let search_after = params
        .after
        .as_deref()
        .map(decode_cursor)
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;
    let search_before = params
        .before
        .as_deref()
        .map(decode_cursor)
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;

    let filters: Vec<QueryClause> = match &params.filters {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| bad_request(format!("invalid filters: {e}")))?,
        None => Vec::new(),
    };

    let date_range = match (params.from, params.to) {
        (Some(from), Some(to)) => Some(DateRange { from, to }),
        (None, None) => None,
        _ => return Err(bad_request("from and to must be supplied together")),
    };

    let request = AlertListRequest {
        page_size: params.page_size.unwrap_or(defaults.default_page_size),
        sort: params
            .sort
            .clone()
            .unwrap_or_else(|| defaults.default_sort.clone()),
        order,
        date_range,
        query: params.query.clone(),
        filters,
        page_index: params.page_index,
        search_after,
        search_before,
    };
    request.validate().map_err(|e| bad_request(e.to_string()))?;
    Ok(request)
}

/// Rebuild the list URL with the shared parameters plus one cursor.
fn page_url(params: &AlertListParams, request: &AlertListRequest, cursor_param: &str, cursor: &str) -> String {
    let mut parts = vec![
        format!("page_size={}", request.page_size),
        format!("sort={}", urlencoding::encode(&request.sort)),
        format!("order={}", request.order.as_str()),
    ];
    if let Some(query) = &params.query {
        parts.push(format!("query={}", urlencoding::encode(query)));
    }
    if let Some(filters) = &params.filters {
        parts.push(format!("filters={}", urlencoding::encode(filters)));
    }
    if let Some(range) = &request.date_range {
        parts.push(format!(
            "from={}",
            urlencoding::encode(&range.from.to_rfc3339())
        ));
        parts.push(format!("to={}", urlencoding::encode(&range.to.to_rfc3339())));
    }
    parts.push(format!("{cursor_param}={cursor}"));
    format!("/alerts?{}", parts.join("&"))
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertListParams>,
) -> Result<Json<AlertListResponse>, (StatusCode, String)> {
    let request = build_request(&state, &params)?;

    let page = search_alerts(
        state.store.as_ref(),
        &state.config.alerts.index,
        &request,
        state.config.alerts.max_per_search,
    )
    .await
    .map_err(|e| match e {
        sentinel_detection::DetectionError::Store(se) => map_store_error(se, "alert search"),
        other => bad_request(other.to_string()),
    })?;

    // A full page suggests more data; emit cursors from the edge hits.
    let next = match page.hits.last() {
        Some(last) if page.hits.len() == request.page_size => Some(page_url(
            &params,
            &request,
            "after",
            &encode_cursor(&last.sort),
        )),
        _ => None,
    };
    let prev = page.hits.first().and_then(|first| {
        let paged_past_start =
            params.after.is_some() || params.before.is_some() || params.page_index.unwrap_or(0) > 0;
        paged_past_start.then(|| page_url(&params, &request, "before", &encode_cursor(&first.sort)))
    });

    let alerts = page
        .hits
        .into_iter()
        .map(|hit| AlertItem {
            id: hit.id,
            sort: hit.sort,
            document: match hit.source {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("source".to_string(), other);
                    map
                }
            },
        })
        .collect();

    Ok(Json(AlertListResponse {
        alerts,
        total: page.total,
        total_is_lower_bound: page.total_is_lower_bound,
        next,
        prev,
    }))
}

#[derive(Serialize)]
pub struct AlertDetailResponse {
    pub id: String,
    pub document: Value,
    /// Cursor URL for the page after this alert in the default ordering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertDetailResponse>, (StatusCode, String)> {
    let got = state
        .store
        .get(&state.config.alerts.index, &id)
        .await
        .map_err(|e| map_store_error(e, "alert lookup"))?;

    // Neighbor links use the alert's own sort tuple in the default order.
    let defaults = &state.config.alerts;
    let sort_tuple: Option<Vec<Value>> = field_value(&got.source, &defaults.default_sort)
        .cloned()
        .map(|primary| {
            let tie_break = field_value(&got.source, "event.sequence")
                .cloned()
                .unwrap_or(Value::Null);
            vec![primary, tie_break]
        });
    let (next, prev) = match sort_tuple {
        Some(tuple) => {
            let cursor = encode_cursor(&tuple);
            (
                Some(format!("/alerts?after={cursor}")),
                Some(format!("/alerts?before={cursor}")),
            )
        }
        None => (None, None),
    };

    Ok(Json(AlertDetailResponse {
        id: got.id,
        document: got.source,
        next,
        prev,
    }))
}

#[derive(Deserialize)]
pub struct PatchAlertRequest {
    pub active: bool,
}

pub async fn patch_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PatchAlertRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .store
        .update(
            &state.config.alerts.index,
            &id,
            json!({ "alert": { "active": body.active } }),
        )
        .await
        .map_err(|e| map_store_error(e, "alert update"))?;
    Ok(StatusCode::NO_CONTENT)
}
