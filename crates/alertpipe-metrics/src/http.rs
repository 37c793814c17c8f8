// crates/alertpipe-metrics/src/http.rs
// ============================================================================
// Module: Metrics HTTP Endpoint
// Description: Read-only axum router exposing a stage's live counters.
// Purpose: Let an operator curl a running stage process for its current
//          counters without waiting for the next KV flush (§4.5's metrics
//          surface, scoped to one process rather than a fleet).
// Dependencies: alertpipe-metrics::counters, axum, serde_json
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::Value;
use serde_json::json;

use crate::counters::CounterRegistry;

/// Builds the `GET /metrics` router for `registry`. Binding and serving it
/// is the stage binary's responsibility (see the `alertpipe` CLI's per-
/// stage `serve` paths).
#[must_use]
pub fn metrics_router(registry: Arc<CounterRegistry>) -> Router {
    Router::new().route("/metrics", get(get_metrics)).with_state(registry)
}

async fn get_metrics(State(registry): State<Arc<CounterRegistry>>) -> Json<Value> {
    Json(json!({ "counters": registry.totals_snapshot() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt as _;

    #[tokio::test]
    async fn metrics_endpoint_reports_current_totals() {
        let registry = Arc::new(CounterRegistry::new());
        registry.increment("alerts_received_total", 9);
        let app = metrics_router(registry);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
