use crate::{
    config::AppConfig,
    db::AnalyticsClient,
    dimension::Dimension,
    error::{Result, ServiceError},
    filters::{FilterQuery, Filters},
    models::{
        CancellationDimensionalPoint, CancellationGroup, CancellationSeriesPoint,
        CancellationTotals, ComparisonPeriodData, ConversionFunnel, ConversionGroup,
        DimensionalTimeSeriesPoint, ExecutiveTotals, GroupedRow, TimeSeriesPoint,
    },
    query::{FilterOptions, ReportQuery, ReportRequest, TranslateRequest, TranslateResponse},
    state::AppState,
    vehicle::{self, CategoryTiers},
};
use anyhow::Context;
use axum::{
    async_trait,
    extract::{FromRequest, Path, Query, Request, State},
    http::{HeaderMap, Method},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let client = Arc::new(AnalyticsClient::connect(&config.clickhouse).await);
        let config = Arc::new(config);
        let state = AppState::new(Arc::clone(&config), client);

        Ok(Self { config, state })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::liveness))
            .route("/health", get(Self::health))
            .route(
                "/api/metrics/executive",
                get(Self::executive).post(Self::executive),
            )
            .route("/api/metrics/comparison", post(Self::comparison))
            .route(
                "/api/metrics/timeseries",
                get(Self::time_series).post(Self::time_series),
            )
            .route(
                "/api/metrics/grouped",
                get(Self::grouped).post(Self::grouped),
            )
            .route(
                "/api/metrics/dimensional-timeseries",
                get(Self::dimensional_time_series).post(Self::dimensional_time_series),
            )
            .route(
                "/api/conversion/funnel",
                get(Self::conversion_funnel).post(Self::conversion_funnel),
            )
            .route(
                "/api/conversion/grouped",
                get(Self::conversion_grouped).post(Self::conversion_grouped),
            )
            .route(
                "/api/cancellations/totals",
                get(Self::cancellation_totals).post(Self::cancellation_totals),
            )
            .route(
                "/api/cancellations/timeseries",
                get(Self::cancellation_time_series).post(Self::cancellation_time_series),
            )
            .route(
                "/api/cancellations/grouped",
                get(Self::cancellation_grouped).post(Self::cancellation_grouped),
            )
            .route(
                "/api/cancellations/dimensional-timeseries",
                get(Self::cancellation_dimensional_time_series)
                    .post(Self::cancellation_dimensional_time_series),
            )
            .route("/api/filters/options/:dimension", get(Self::filter_options))
            .route("/api/cities/:name", get(Self::city))
            .route("/api/vehicle-categories", get(Self::vehicle_categories))
            .route("/api/translate", post(Self::translate))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "ops metrics listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("ops metrics server failed")?;

        self.state.client.close();
        info!("ops metrics stopped");
        Ok(())
    }

    async fn liveness() -> Json<serde_json::Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
        state.client.ping().await.map_err(ServiceError::Unavailable)?;
        Ok(Json(json!({ "status": "ok", "clickhouse": "connected" })))
    }

    async fn executive(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<TotalsResponse<ExecutiveTotals>>> {
        enforce_api_key(&headers, &state.config)?;
        let totals = state.engine.executive_totals(&request).await?;
        Ok(Json(TotalsResponse::new(totals, request)))
    }

    async fn comparison(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<ComparisonPeriodData>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.comparison(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn time_series(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<Vec<TimeSeriesPoint>>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.time_series(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn grouped(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<Vec<GroupedRow>>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.grouped(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn dimensional_time_series(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<Vec<DimensionalTimeSeriesPoint>>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.dimensional_time_series(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn conversion_funnel(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<ConversionFunnel>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.conversion_funnel(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn conversion_grouped(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<Vec<ConversionGroup>>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.conversion_grouped(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn cancellation_totals(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<TotalsResponse<CancellationTotals>>> {
        enforce_api_key(&headers, &state.config)?;
        let totals = state.engine.cancellation_totals(&request).await?;
        Ok(Json(TotalsResponse::new(totals, request)))
    }

    async fn cancellation_time_series(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<Vec<CancellationSeriesPoint>>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.cancellation_time_series(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn cancellation_grouped(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<Vec<CancellationGroup>>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state.engine.cancellation_grouped(&request).await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn cancellation_dimensional_time_series(
        State(state): State<AppState>,
        headers: HeaderMap,
        ReportInput(request): ReportInput,
    ) -> Result<Json<DataResponse<Vec<CancellationDimensionalPoint>>>> {
        enforce_api_key(&headers, &state.config)?;
        let data = state
            .engine
            .cancellation_dimensional_time_series(&request)
            .await?;
        Ok(Json(DataResponse::new(data, request)))
    }

    async fn filter_options(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(dimension): Path<String>,
        Query(query): Query<FilterQuery>,
    ) -> Result<Json<FilterOptions>> {
        enforce_api_key(&headers, &state.config)?;
        let dimension: Dimension = dimension.parse().map_err(ServiceError::InvalidRequest)?;
        let filters = query.into_filters()?;
        let options = state.engine.filter_options(dimension, &filters).await?;
        Ok(Json(options))
    }

    async fn city(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(name): Path<String>,
    ) -> Result<Json<serde_json::Value>> {
        enforce_api_key(&headers, &state.config)?;
        let city_id = state.engine.city_id(&name).await;
        Ok(Json(json!({ "name": name, "cityId": city_id })))
    }

    async fn vehicle_categories(
        State(state): State<AppState>,
        headers: HeaderMap,
    ) -> Result<Json<Vec<CategoryTiers>>> {
        enforce_api_key(&headers, &state.config)?;
        Ok(Json(vehicle::category_tiers()))
    }

    async fn translate(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<TranslateRequest>,
    ) -> Result<Json<TranslateResponse>> {
        enforce_api_key(&headers, &state.config)?;
        let response = state.engine.translate(request)?;
        Ok(Json(response))
    }
}

#[derive(Debug, Serialize)]
struct DataResponse<T> {
    data: T,
    filters: Filters,
}

impl<T> DataResponse<T> {
    fn new(data: T, request: ReportRequest) -> Self {
        Self {
            data,
            filters: request.filters,
        }
    }
}

#[derive(Debug, Serialize)]
struct TotalsResponse<T> {
    totals: T,
    filters: Filters,
}

impl<T> TotalsResponse<T> {
    fn new(totals: T, request: ReportRequest) -> Self {
        Self {
            totals,
            filters: request.filters,
        }
    }
}

/// Report inputs from the query string on `GET` and from a JSON body
/// otherwise. Malformed input of either kind is a 400.
struct ReportInput(ReportRequest);

#[async_trait]
impl<S> FromRequest<S> for ReportInput
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        if req.method() == Method::GET {
            let Query(query) = Query::<ReportQuery>::try_from_uri(req.uri())
                .map_err(|rejection| ServiceError::InvalidRequest(rejection.body_text()))?;
            return Ok(Self(query.into_request()?));
        }

        let Json(request) = Json::<ReportRequest>::from_request(req, state)
            .await
            .map_err(|rejection| ServiceError::InvalidRequest(rejection.body_text()))?;
        Ok(Self(request))
    }
}

fn enforce_api_key(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
