//! Read-only JSON API over the portfolio metrics engine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use portico_core::{DateWindow, PropertyId};
use portico_metrics::{
    compare_windows_with, gather_bundles, merge_bundles, BreakdownKey, CancelHandle,
    CategoryBreakdown, GatherConfig, MetricDelta, MetricKey, MetricsConfig, MetricsError,
    PortfolioBundle, SeriesKey, SliceSource,
};
use portico_store::{PgUnifiedStore, StoreConfig};
use portico_sync::PropertyRegistry;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "portico-web";

/// Handlers only see the slice source trait, so tests run against an
/// in-memory source.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn SliceSource>,
    pub registry: Arc<PropertyRegistry>,
    pub metrics_cfg: MetricsConfig,
    pub gather_cfg: GatherConfig,
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    /// Comma-separated property ids.
    ids: String,
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct TrendQuery {
    /// Comma-separated property ids.
    ids: String,
    start: NaiveDate,
    end: NaiveDate,
    /// Optional polarity overrides as comma-separated `key:up` or
    /// `key:down` pairs; `up` counts a rising metric as improvement.
    better: Option<String>,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    window: DateWindow,
    /// Rendered values: percentages 0-100 at 1 dp, money at 2 dp.
    metrics: BTreeMap<MetricKey, f64>,
    breakdowns: BTreeMap<BreakdownKey, CategoryBreakdown>,
    series: BTreeMap<SeriesKey, Vec<RenderedPoint>>,
    sources_requested: usize,
    sources_contributing: Vec<PropertyId>,
    skipped: Vec<SkippedEntry>,
}

#[derive(Debug, Serialize)]
struct RenderedPoint {
    date: NaiveDate,
    value: f64,
}

#[derive(Debug, Serialize)]
struct SkippedEntry {
    property_id: PropertyId,
    reason: String,
}

#[derive(Debug, Serialize)]
struct TrendResponse {
    current_window: DateWindow,
    prior_window: DateWindow,
    deltas: BTreeMap<MetricKey, MetricDelta>,
    current_sources: Vec<PropertyId>,
    prior_sources: Vec<PropertyId>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/properties", get(properties_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/metrics/trend", get(trend_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("PORTICO_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let registry_path = std::env::var("PORTICO_REGISTRY_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./properties.yaml"));
    let registry = PropertyRegistry::load(&registry_path).await?;
    let store = PgUnifiedStore::connect(&StoreConfig::from_env()).await?;
    let state = AppState {
        source: Arc::new(store),
        registry: Arc::new(registry),
        metrics_cfg: MetricsConfig::from_env(),
        gather_cfg: GatherConfig::from_env(),
    };
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(serde_json::json!({"status": "ok"})).into_response()
}

async fn properties_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.registry.properties.clone()).into_response()
}

async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let (ids, window) = match parse_request(&query.ids, query.start, query.end) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };
    match portfolio_for(&state, &ids, window).await {
        Ok(portfolio) => Json(metrics_response(portfolio)).into_response(),
        Err(err) => merge_error_response(err),
    }
}

async fn trend_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendQuery>,
) -> Response {
    let (ids, window) = match parse_request(&query.ids, query.start, query.end) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };
    let polarity = match &query.better {
        Some(raw) => match parse_polarity(raw) {
            Ok(overrides) => overrides,
            Err(resp) => return resp,
        },
        None => BTreeMap::new(),
    };
    let prior_window = window.prior();

    let current = match portfolio_for(&state, &ids, window).await {
        Ok(portfolio) => portfolio,
        Err(err) => return merge_error_response(err),
    };
    let prior = match portfolio_for(&state, &ids, prior_window).await {
        Ok(portfolio) => portfolio,
        Err(err) => return merge_error_response(err),
    };

    let report = compare_windows_with(&current.bundle, &prior.bundle, &polarity);
    Json(TrendResponse {
        current_window: report.current_window,
        prior_window: report.prior_window,
        deltas: report.deltas,
        current_sources: current.sources_contributing,
        prior_sources: prior.sources_contributing,
    })
    .into_response()
}

/// Gather per-property bundles and merge them; N=1 requests take the same
/// path as portfolios.
async fn portfolio_for(
    state: &AppState,
    ids: &[PropertyId],
    window: DateWindow,
) -> Result<PortfolioBundle, MetricsError> {
    let results = gather_bundles(
        Arc::clone(&state.source),
        ids,
        window,
        state.metrics_cfg.clone(),
        &state.gather_cfg,
        CancelHandle::new(),
    )
    .await;
    merge_bundles(results)
}

fn parse_request(
    ids: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(Vec<PropertyId>, DateWindow), Response> {
    let ids: Vec<PropertyId> = ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PropertyId::from)
        .collect();
    if ids.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "ids must name at least one property",
        ));
    }
    let window = DateWindow::new(start, end)
        .map_err(|err| error_response(StatusCode::BAD_REQUEST, err.to_string()))?;
    Ok((ids, window))
}

/// Parse `key:up,key:down` pairs into per-key polarity overrides.
fn parse_polarity(raw: &str) -> Result<BTreeMap<MetricKey, bool>, Response> {
    let mut overrides = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, dir)) = pair.split_once(':') else {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("better entries take the form key:up or key:down, got `{pair}`"),
            ));
        };
        let name = name.trim();
        let key: MetricKey =
            match serde_json::from_value(serde_json::Value::String(name.to_string())) {
                Ok(key) => key,
                Err(_) => {
                    return Err(error_response(
                        StatusCode::BAD_REQUEST,
                        format!("unknown metric key `{name}`"),
                    ))
                }
            };
        let higher_is_better = match dir.trim() {
            "up" => true,
            "down" => false,
            other => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("direction must be up or down, got `{other}`"),
                ))
            }
        };
        overrides.insert(key, higher_is_better);
    }
    Ok(overrides)
}

fn metrics_response(portfolio: PortfolioBundle) -> MetricsResponse {
    let PortfolioBundle {
        bundle,
        sources_requested,
        sources_contributing,
        skipped,
    } = portfolio;
    let metrics = bundle.rendered_metrics();
    let series = bundle
        .series
        .iter()
        .map(|(key, points)| {
            let rendered = points
                .iter()
                .map(|point| RenderedPoint {
                    date: point.date,
                    value: point.value.render(),
                })
                .collect();
            (*key, rendered)
        })
        .collect();
    MetricsResponse {
        window: bundle.window,
        metrics,
        breakdowns: bundle.breakdowns,
        series,
        sources_requested,
        sources_contributing,
        skipped: skipped
            .into_iter()
            .map(|source| SkippedEntry {
                property_id: source.property_id,
                reason: source.reason.to_string(),
            })
            .collect(),
    }
}

fn merge_error_response(err: MetricsError) -> Response {
    let status = match err {
        MetricsError::NoValidSources { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}
