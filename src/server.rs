//! Web server module for the exporter.
//!
//! Serves `/metrics` in the Prometheus text format and a `/healthz` probe.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::collector::{Collector, ScrapeError, ScrapeOutcome, ScrapeRequest, ScrapeSettings};
use crate::exposition::{ExporterMetrics, MetricSources, encode_text, outcome_registry};

/// Header Prometheus uses to announce its scrape timeout.
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

/// Content type of the text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub metrics: ExporterMetrics,
    pub settings: ScrapeSettings,
    pub namespace: String,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    providers: usize,
    cached_values: usize,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        providers: state.collector.providers().len(),
        cached_values: state.collector.cache().len(),
    })
}

/// Scrape endpoint.
///
/// Accepts `target` and repeated `collect[]` query parameters. The scrape
/// deadline comes from the scrape timeout header when present.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let mut target = None;
    let mut collect = Vec::new();
    for (key, value) in params {
        match key.as_str() {
            "target" => target = Some(value),
            "collect[]" => collect.push(value),
            _ => {}
        }
    }

    let request = match parse_timeout_header(&headers)
        .and_then(|timeout| ScrapeRequest::new(target, collect, timeout, &state.settings))
    {
        Ok(request) => request,
        Err(e) => return scrape_error_response(&state, e),
    };

    let outcome = state.collector.collect(&request).await;

    match render(&state, &outcome) {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Read the caller's scrape timeout in seconds, if sent.
fn parse_timeout_header(headers: &HeaderMap) -> Result<Option<f64>, ScrapeError> {
    let Some(value) = headers.get(SCRAPE_TIMEOUT_HEADER) else {
        return Ok(None);
    };

    let text = value
        .to_str()
        .map_err(|_| ScrapeError::InvalidTimeout("header is not valid ASCII".to_string()))?;
    text.trim()
        .parse::<f64>()
        .map(Some)
        .map_err(|_| ScrapeError::InvalidTimeout(format!("cannot parse '{}' as seconds", text)))
}

fn scrape_error_response(state: &AppState, error: ScrapeError) -> Response {
    let status = match error {
        ScrapeError::InvalidTimeout(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(status = status.as_u16(), "Rejecting scrape: {}", error);
    state.metrics.record_scrape("error");
    (status, error.to_string()).into_response()
}

fn render(
    state: &AppState,
    outcome: &ScrapeOutcome,
) -> Result<String, crate::exposition::ExpositionError> {
    let request_registry = outcome_registry(outcome, &state.namespace)?;

    state.metrics.observe_cache(state.collector.cache());
    state.metrics.record_scrape(if outcome.failures() == 0 {
        "success"
    } else {
        "partial"
    });

    let families = MetricSources::new()
        .with(state.metrics.registry())
        .with(&request_registry)
        .gather();
    encode_text(&families)
}
