//! HTTP routes and request handlers.

use crate::app_state::{AppState, SharedAppState};
use crate::cli::CommandLineArgs;
use crate::csv_export::{csv_response, CsvChunks};
use crate::error::RefError;
use crate::filter::{parse_source_filters, IdFilter, MetricValueQuery};
use crate::metrics;
use crate::models::{
    ComparisonParams, DiagnosticSummary, FacetParams, Format, MetricValueCollection,
    MetricValueComparison, MetricValueFacetSummary, ScalarValue, SeriesValue, ValueType,
    ValuesParams,
};
use crate::outliers::{annotate, process_scalar_values};
use crate::store::ValueScope;
use crate::validated_query::ValidatedQuery;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tracing::{event, Level};

/// `axum` service type returned by [service].
pub type Service = NormalizePath<Router>;

/// Returns a [axum::Router] with all routes.
///
/// API routes are nested under the configured prefix. Prometheus metrics are served at
/// `/metrics`.
fn router(state: SharedAppState) -> Router {
    fn api() -> Router<SharedAppState> {
        Router::new()
            .route("/diagnostics", get(list_diagnostics))
            .route(
                "/diagnostics/:provider_slug/:diagnostic_slug",
                get(get_diagnostic),
            )
            .route(
                "/diagnostics/:provider_slug/:diagnostic_slug/values",
                get(diagnostic_values),
            )
            .route(
                "/diagnostics/:provider_slug/:diagnostic_slug/comparison",
                get(diagnostic_comparison),
            )
            .route(
                "/diagnostics/:provider_slug/:diagnostic_slug/facets",
                get(diagnostic_facets),
            )
            .route("/executions/:execution_id/values", get(execution_values))
            .route("/utils/health-check", get(health_check))
    }

    let prefix = state.args.api_prefix.trim_matches('/').to_string();
    let router = Router::new().route("/metrics", get(metrics::metrics_handler));
    let router = if prefix.is_empty() {
        router.merge(api())
    } else {
        router.nest(&format!("/{prefix}"), api())
    };
    router
        .layer(
            TraceLayer::new_for_http()
                .on_request(metrics::request_counter)
                .on_response(metrics::record_response_metrics),
        )
        .with_state(state)
}

/// Returns a [Service] with all routes, with trailing slashes in request paths removed.
pub fn service(state: SharedAppState) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Initialise the application.
///
/// Sizes the global Rayon pool if requested.
pub fn init(args: &CommandLineArgs) {
    if args.use_rayon {
        if let Some(threads) = args.rayon_threads {
            if let Err(err) = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
            {
                event!(Level::WARN, "failed to configure Rayon thread pool: {}", err);
            }
        }
    }
}

/// Run a CPU-bound function, on the Rayon pool if enabled.
async fn compute<F, T>(args: &CommandLineArgs, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if args.use_rayon {
        tokio_rayon::spawn(f).await
    } else {
        f()
    }
}

/// Look up a diagnostic, treating providers outside the allow-list as unknown.
async fn find_diagnostic(
    state: &AppState,
    provider_slug: String,
    diagnostic_slug: String,
) -> Result<DiagnosticSummary, RefError> {
    if state.is_provider_allowed(&provider_slug) {
        if let Some(diagnostic) = state
            .store
            .diagnostic(&provider_slug, &diagnostic_slug)
            .await?
        {
            return Ok(diagnostic);
        }
    }
    Err(RefError::DiagnosticNotFound {
        provider_slug,
        diagnostic_slug,
    })
}

/// Build a store query from dimension filters and id lists.
fn build_query(
    state: &AppState,
    filters: &HashMap<String, String>,
    isolate_ids: Option<&str>,
    exclude_ids: Option<&str>,
) -> Result<MetricValueQuery, RefError> {
    Ok(MetricValueQuery::new(
        state.dimensions.predicates(filters),
        IdFilter::from_params(isolate_ids, exclude_ids)?,
    ))
}

/// Fetch the scalar and series values selected by `query`.
async fn fetch_values(
    state: &AppState,
    scope: ValueScope,
    query: &MetricValueQuery,
    value_type: ValueType,
) -> Result<(Vec<ScalarValue>, Vec<SeriesValue>), RefError> {
    let scalars = if value_type.includes_scalar() {
        state.store.scalar_values(scope, query).await?
    } else {
        Vec::new()
    };
    let series = if value_type.includes_series() {
        state.store.series_values(scope, query).await?
    } else {
        Vec::new()
    };
    Ok((scalars, series))
}

/// Query, annotate and render metric values as JSON or CSV.
async fn values_response(
    state: SharedAppState,
    scope: ValueScope,
    params: ValuesParams,
    filters: HashMap<String, String>,
    filename: String,
) -> Result<Response, RefError> {
    let query = build_query(
        &state,
        &filters,
        params.isolate_ids.as_deref(),
        params.exclude_ids.as_deref(),
    )?;
    let (scalars, series) = fetch_values(&state, scope, &query, params.value_type).await?;
    event!(
        Level::DEBUG,
        "{:?}: {} scalar and {} series values",
        scope,
        scalars.len(),
        series.len()
    );

    let config = state.outlier_config.clone();
    let (method, include_unverified) = (params.detect_outliers, params.include_unverified);
    let (scalars, summary) = compute(&state.args, move || {
        process_scalar_values(scalars, method, include_unverified, &config)
    })
    .await;
    metrics::record_detection(summary.as_ref());

    match params.format {
        Format::Json => {
            Ok(Json(MetricValueCollection::build(scalars, series, summary)).into_response())
        }
        Format::Csv => csv_response(
            CsvChunks::new(scalars, series, summary.is_some()),
            &filename,
            summary,
        ),
    }
}

async fn health_check() -> Json<bool> {
    Json(true)
}

/// List the diagnostics of allowed providers.
async fn list_diagnostics(
    State(state): State<SharedAppState>,
) -> Result<Json<Vec<DiagnosticSummary>>, RefError> {
    let diagnostics = state
        .store
        .diagnostics()
        .await?
        .into_iter()
        .filter(|diagnostic| state.is_provider_allowed(&diagnostic.provider.slug))
        .collect();
    Ok(Json(diagnostics))
}

async fn get_diagnostic(
    State(state): State<SharedAppState>,
    Path((provider_slug, diagnostic_slug)): Path<(String, String)>,
) -> Result<Json<DiagnosticSummary>, RefError> {
    Ok(Json(
        find_diagnostic(&state, provider_slug, diagnostic_slug).await?,
    ))
}

async fn diagnostic_values(
    State(state): State<SharedAppState>,
    Path((provider_slug, diagnostic_slug)): Path<(String, String)>,
    ValidatedQuery(params): ValidatedQuery<ValuesParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Response, RefError> {
    let filename = format!("{provider_slug}_{diagnostic_slug}_values.csv");
    let diagnostic = find_diagnostic(&state, provider_slug, diagnostic_slug).await?;
    values_response(
        state,
        ValueScope::Diagnostic(diagnostic.id),
        params,
        filters,
        filename,
    )
    .await
}

/// Compare the values of a source subset against the rest of the ensemble.
///
/// Outlier detection runs over the whole filtered set before partitioning.
async fn diagnostic_comparison(
    State(state): State<SharedAppState>,
    Path((provider_slug, diagnostic_slug)): Path<(String, String)>,
    ValidatedQuery(params): ValidatedQuery<ComparisonParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<MetricValueComparison>, RefError> {
    let source_filters = parse_source_filters(&state.dimensions, &params.source_filters)?;
    let diagnostic = find_diagnostic(&state, provider_slug, diagnostic_slug).await?;
    let query = build_query(
        &state,
        &filters,
        params.isolate_ids.as_deref(),
        params.exclude_ids.as_deref(),
    )?;
    let (scalars, series) = fetch_values(
        &state,
        ValueScope::Diagnostic(diagnostic.id),
        &query,
        params.value_type,
    )
    .await?;

    let config = state.outlier_config.clone();
    let method = params.detect_outliers;
    let (scalars, summary) =
        compute(&state.args, move || annotate(scalars, method, &config)).await;
    metrics::record_detection(summary.as_ref());

    Ok(Json(MetricValueComparison::build(
        scalars,
        series,
        summary.is_some(),
        &source_filters,
        params.include_unverified,
    )))
}

/// Distinct values of each dimension for the filtered values of a diagnostic.
async fn diagnostic_facets(
    State(state): State<SharedAppState>,
    Path((provider_slug, diagnostic_slug)): Path<(String, String)>,
    ValidatedQuery(params): ValidatedQuery<FacetParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<MetricValueFacetSummary>, RefError> {
    let diagnostic = find_diagnostic(&state, provider_slug, diagnostic_slug).await?;
    let query = build_query(
        &state,
        &filters,
        params.isolate_ids.as_deref(),
        params.exclude_ids.as_deref(),
    )?;
    let (scalars, series) = fetch_values(
        &state,
        ValueScope::Diagnostic(diagnostic.id),
        &query,
        ValueType::All,
    )
    .await?;
    Ok(Json(MetricValueFacetSummary::build(
        &state.dimensions,
        &scalars,
        &series,
    )))
}

async fn execution_values(
    State(state): State<SharedAppState>,
    Path(execution_id): Path<i64>,
    ValidatedQuery(params): ValidatedQuery<ValuesParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Response, RefError> {
    if state.store.execution(execution_id).await?.is_none() {
        return Err(RefError::ExecutionNotFound { execution_id });
    }
    values_response(
        state,
        ValueScope::Execution(execution_id),
        params,
        filters,
        format!("execution_{execution_id}_values.csv"),
    )
    .await
}

/// Build a [SharedAppState] from parsed command line arguments.
pub fn state(args: &CommandLineArgs) -> Result<SharedAppState, RefError> {
    Ok(Arc::new(AppState::new(args)?))
}
