//! In-process TSD for integration tests.
//!
//! Serves the subset of the OpenTSDB HTTP API the client uses, keeps written
//! points in memory, and can be told to reject points or whole requests.

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use otsdb_core::models::data_point::DataPoint;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub struct TsdState {
    /// `/api/put` requests received
    pub put_requests: AtomicUsize,
    /// Accepted points, in arrival order
    pub points: RwLock<Vec<DataPoint>>,
    /// Reject this many negative-valued points before accepting them
    pub flaky_rejects: AtomicUsize,
    /// Answer this many `/api/put` requests with 503
    pub unavailable_puts: AtomicUsize,
}

pub struct MockTsd {
    addr: String,
    pub state: Arc<TsdState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockTsd {
    pub async fn start() -> Self {
        Self::start_with(TsdState::default()).await
    }

    pub async fn start_with(state: TsdState) -> Self {
        let state = Arc::new(state);
        let app = router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock TSD");
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("mock TSD failed");
        });

        Self {
            addr: format!("http://127.0.0.1:{port}"),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> &str {
        &self.addr
    }

    pub fn put_requests(&self) -> usize {
        self.state.put_requests.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Vec<DataPoint> {
        self.state.points.read().clone()
    }
}

impl Drop for MockTsd {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn router(state: Arc<TsdState>) -> Router {
    Router::new()
        .route("/api/put", post(handle_put))
        .route("/api/query", get(handle_query))
        .route("/api/aggregators", get(handle_aggregators))
        .route("/api/version", get(handle_version))
        .route("/api/suggest", get(handle_suggest))
        .with_state(state)
}

async fn handle_put(
    State(state): State<Arc<TsdState>>,
    Json(points): Json<Vec<DataPoint>>,
) -> impl IntoResponse {
    state.put_requests.fetch_add(1, Ordering::SeqCst);

    let unavailable = state
        .unavailable_puts
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if unavailable {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": {"code": 503, "message": "overloaded"}})),
        );
    }

    let mut errors = Vec::new();
    let mut success = 0;
    for point in points {
        let reject = point.value < 0.0
            && state
                .flaky_rejects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if reject {
            errors.push(json!({"datapoint": point, "error": "Unable to write"}));
        } else {
            state.points.write().push(point);
            success += 1;
        }
    }

    let status = if errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    let failed = errors.len();
    (
        status,
        Json(json!({"success": success, "failed": failed, "errors": errors})),
    )
}

/// Groups stored points of the requested metric by tag set. Tag filters in
/// `m` must match exactly, `*` matches any value.
async fn handle_query(
    State(state): State<Arc<TsdState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(m) = params.get("m") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": 400, "message": "Missing parameter <code>m</code>"}})),
        );
    };
    let (metric, filters) = parse_m(m);

    let mut series: BTreeMap<Vec<(String, String)>, BTreeMap<String, f64>> = BTreeMap::new();
    for point in state.points.read().iter() {
        if point.metric != metric {
            continue;
        }
        let matches = filters
            .iter()
            .all(|(k, v)| point.tags.get(k).is_some_and(|pv| v == "*" || pv == v));
        if !matches {
            continue;
        }
        let key: Vec<(String, String)> = point.tags.clone().into_iter().collect();
        series
            .entry(key)
            .or_default()
            .insert(point.timestamp.to_string(), point.value);
    }

    let body: Vec<serde_json::Value> = series
        .into_iter()
        .map(|(tags, dps)| {
            let tags: BTreeMap<String, String> = tags.into_iter().collect();
            json!({"metric": metric, "tags": tags, "aggregateTags": [], "dps": dps})
        })
        .collect();
    (StatusCode::OK, Json(json!(body)))
}

fn parse_m(m: &str) -> (String, Vec<(String, String)>) {
    let rest = m.split_once(':').map(|(_, r)| r).unwrap_or(m);
    let (metric, tags) = match rest.split_once('{') {
        Some((metric, tags)) => (metric, tags.trim_end_matches('}')),
        None => (rest, ""),
    };
    let filters = tags
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (metric.to_string(), filters)
}

async fn handle_aggregators() -> impl IntoResponse {
    Json(json!(["avg", "count", "max", "min", "sum"]))
}

async fn handle_version() -> impl IntoResponse {
    Json(json!({
        "version": "2.4.1",
        "short_revision": "mock",
        "host": "localhost",
        "repo_status": "MINT"
    }))
}

async fn handle_suggest(
    State(state): State<Arc<TsdState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let prefix = params.get("q").cloned().unwrap_or_default();
    let max: usize = params.get("max").and_then(|m| m.parse().ok()).unwrap_or(25);
    let mut names: Vec<String> = state
        .points
        .read()
        .iter()
        .map(|p| p.metric.clone())
        .filter(|m| m.starts_with(&prefix))
        .collect();
    names.sort();
    names.dedup();
    names.truncate(max);
    Json(json!(names))
}
