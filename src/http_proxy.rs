//! Thin HTTP front for the visualization UI (A5): serves synthesized
//! aggregate-trace JSON for `GET /api/traces/:id` when `:id` matches a
//! report finding, and forwards every other request unchanged to the
//! upstream tracing UI (`spec.md` §6).

use crate::aggregate_trace::JaegerDocument;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ProxyState {
    agg_traces: Arc<BTreeMap<String, JaegerDocument>>,
    upstream_base: String,
    client: reqwest::Client,
}

impl ProxyState {
    pub fn new(agg_traces: BTreeMap<String, JaegerDocument>, upstream_base: impl Into<String>) -> Self {
        Self {
            agg_traces: Arc::new(agg_traces),
            upstream_base: upstream_base.into(),
            client: reqwest::Client::new(),
        }
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/traces/:id", get(get_trace))
        .fallback(forward)
        .with_state(state)
}

async fn get_trace(State(state): State<ProxyState>, Path(id): Path<String>) -> Response {
    match state.agg_traces.get(&id) {
        Some(doc) => match serde_json::to_vec(doc) {
            Ok(body) => ([("content-type", "application/json")], body).into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        },
        None => forward_to_upstream(&state, &format!("/api/traces/{id}")).await,
    }
}

async fn forward(State(state): State<ProxyState>, uri: Uri) -> Response {
    forward_to_upstream(&state, uri.path_and_query().map(|pq| pq.as_str()).unwrap_or(uri.path())).await
}

async fn forward_to_upstream(state: &ProxyState, path_and_query: &str) -> Response {
    let url = format!("{}{path_and_query}", state.upstream_base.trim_end_matches('/'));
    match state.client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            match resp.bytes().await {
                Ok(bytes) => (status, Body::from(bytes)).into_response(),
                Err(err) => {
                    tracing::error!(%err, %url, "failed reading upstream response body");
                    (StatusCode::BAD_GATEWAY, "upstream read error").into_response()
                }
            }
        }
        Err(err) => {
            tracing::error!(%err, %url, "failed forwarding request to upstream");
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate_trace;
    use crate::arrow::ArrowMap;

    #[tokio::test]
    async fn serves_a_synthesized_trace_without_hitting_upstream() {
        let doc = aggregate_trace::generate(&ArrowMap::new(), &[], "1", "THEMASTERSPAN~FullSpan", "THEMASTERSPAN", &BTreeMap::new());
        let mut traces = BTreeMap::new();
        traces.insert("1".to_string(), doc);
        let state = ProxyState::new(traces, "http://localhost:1");
        let response = get_trace(State(state), Path("1".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
