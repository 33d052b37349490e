mod cancellations;
mod conversion;
mod lookups;
mod metrics;

use crate::{
    config::{AppConfig, TableConfig},
    db::AnalyticsClient,
    dimension::{Dimension, Granularity},
    error::{Result, ServiceError},
    filters::{compile_where, FilterQuery, Filters},
    models::{
        CancellationDimensionalPoint, CancellationGroup, CancellationSeriesPoint,
        CancellationTotals, ComparisonPeriodData, ConversionFunnel, ConversionGroup,
        DimensionalTimeSeriesPoint, ExecutiveTotals, GroupedRow, Period, TimeSeriesPoint,
    },
    time,
};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub use lookups::FilterOptions;

/// Value bound to a `?` placeholder. The client renders each one as an
/// escaped literal, so request data never becomes SQL text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum SqlBindValue {
    Text(String),
    UInt(u64),
}

impl SqlBindValue {
    fn apply(&self, query: clickhouse::query::Query) -> clickhouse::query::Query {
        match self {
            SqlBindValue::Text(value) => query.bind(value.as_str()),
            SqlBindValue::UInt(value) => query.bind(*value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<SqlBindValue>,
}

/// `FROM` clause plus the compiled filters for one table.
fn from_filtered(table: &str, filters: &Filters, time_column: &str) -> (String, Vec<SqlBindValue>) {
    let clause = compile_where(filters, time_column);
    if clause.is_empty() {
        (format!("FROM {table}"), Vec::new())
    } else {
        (format!("FROM {table}\n{}", clause.sql), clause.binds)
    }
}

/// Plain `sum` per counter, in the order the row struct declares them.
fn counter_sums(counters: &[&str]) -> String {
    counters
        .iter()
        .map(|counter| {
            format!(
                "{} AS {}",
                nullable_float(&format!("sum({counter})")),
                counter_alias(counter)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Wraps an aggregate so it always decodes as `Nullable(Float64)`.
pub(crate) fn nullable_float(expr: &str) -> String {
    format!("toNullable(toFloat64({expr}))")
}

/// Internal alias for an aggregated counter. Kept distinct from the column
/// name so `sum(x) AS x` never shadows its own input.
pub(crate) fn counter_alias(counter: &str) -> String {
    format!("agg_{counter}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Report inputs shared by every endpoint. Selectors stay raw strings until
/// a report validates the ones it needs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    #[serde(default)]
    pub filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_period: Option<Period>,
}

/// Query-string form of [`ReportRequest`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    #[serde(flatten)]
    pub filters: FilterQuery,
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

impl ReportQuery {
    pub fn into_request(self) -> Result<ReportRequest> {
        let limit = self
            .limit
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| ServiceError::InvalidRequest(format!("invalid limit '{raw}'")))
            })
            .transpose()?;

        Ok(ReportRequest {
            filters: self.filters.into_filters()?,
            dimension: self.dimension,
            granularity: self.granularity,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
            limit,
            previous_period: None,
        })
    }
}

impl ReportRequest {
    pub fn dimension(&self) -> Result<Dimension> {
        let raw = self
            .dimension
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| ServiceError::InvalidRequest("dimension is required".into()))?;
        raw.parse().map_err(ServiceError::InvalidRequest)
    }

    /// Funnel datasets have no JSON-map columns.
    fn scalar_dimension(&self) -> Result<Dimension> {
        let dimension = self.dimension()?;
        if dimension.is_json_map() {
            return Err(ServiceError::InvalidRequest(format!(
                "dimension '{dimension}' is only available for cancellations"
            )));
        }
        Ok(dimension)
    }

    pub fn granularity(&self) -> Result<Granularity> {
        match self.granularity.as_deref().map(str::trim) {
            None | Some("") => Ok(Granularity::default()),
            Some(raw) => raw.parse().map_err(ServiceError::InvalidRequest),
        }
    }

    pub fn sort_order(&self) -> Result<SortOrder> {
        match self
            .sort_order
            .as_deref()
            .map(|raw| raw.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") => Ok(SortOrder::default()),
            Some("asc") => Ok(SortOrder::Asc),
            Some("desc") => Ok(SortOrder::Desc),
            Some(other) => Err(ServiceError::InvalidRequest(format!(
                "unsupported sortOrder '{other}'"
            ))),
        }
    }

    /// Resolves `sortBy` against the counters a report exposes.
    fn sort_counter(&self, counters: &[&'static str], default: &'static str) -> Result<&'static str> {
        match self.sort_by.as_deref().map(str::trim) {
            None | Some("") => Ok(default),
            Some(raw) => counters
                .iter()
                .copied()
                .find(|counter| {
                    counter.eq_ignore_ascii_case(raw)
                        || counter.replace('_', "").eq_ignore_ascii_case(raw)
                })
                .ok_or_else(|| {
                    ServiceError::InvalidRequest(format!(
                        "unsupported sortBy '{raw}', expected one of: {}",
                        counters.join(", ")
                    ))
                }),
        }
    }

    fn limit(&self, config: &AppConfig) -> u32 {
        self.limit
            .unwrap_or(config.default_limit)
            .clamp(1, config.max_limit)
    }
}

/// Report shapes accepted by the translate endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    ExecutiveTotals,
    Comparison,
    TimeSeries,
    Grouped,
    DimensionalTimeSeries,
    ConversionFunnel,
    ConversionGrouped,
    CancellationTotals,
    CancellationTimeSeries,
    CancellationGrouped,
    CancellationDimensionalTimeSeries,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateRequest {
    pub report: ReportKind,
    #[serde(flatten)]
    pub request: ReportRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateResponse {
    pub report: ReportKind,
    pub statements: Vec<Statement>,
}

#[derive(Clone)]
pub struct AnalyticsEngine {
    client: Arc<AnalyticsClient>,
    config: Arc<AppConfig>,
}

impl AnalyticsEngine {
    pub fn new(client: Arc<AnalyticsClient>, config: Arc<AppConfig>) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn tables(&self) -> &TableConfig {
        &self.config.tables
    }

    fn prepare(&self, statement: &Statement) -> Result<clickhouse::query::Query> {
        debug!(sql = %statement.sql, binds = statement.params.len(), "executing analytics query");
        let mut query = self.client.acquire()?.query(&statement.sql);
        for bind in &statement.params {
            query = bind.apply(query);
        }
        Ok(query)
    }

    async fn fetch_all<T>(&self, statement: &Statement) -> Result<Vec<T>>
    where
        T: Row + for<'b> Deserialize<'b>,
    {
        Ok(self.prepare(statement)?.fetch_all::<T>().await?)
    }

    async fn fetch_optional<T>(&self, statement: &Statement) -> Result<Option<T>>
    where
        T: Row + for<'b> Deserialize<'b>,
    {
        Ok(self.prepare(statement)?.fetch_optional::<T>().await?)
    }

    pub async fn executive_totals(&self, request: &ReportRequest) -> Result<ExecutiveTotals> {
        metrics::executive_totals(self, &request.filters).await
    }

    pub async fn comparison(&self, request: &ReportRequest) -> Result<ComparisonPeriodData> {
        let (current, previous) =
            time::comparison_periods(&request.filters, request.previous_period.clone())?;
        metrics::comparison(self, &request.filters, current, previous).await
    }

    pub async fn time_series(&self, request: &ReportRequest) -> Result<Vec<TimeSeriesPoint>> {
        metrics::time_series(self, &request.filters, request.granularity()?).await
    }

    pub async fn grouped(&self, request: &ReportRequest) -> Result<Vec<GroupedRow>> {
        let statement = metrics::grouped_statement(self.config(), request)?;
        metrics::grouped(self, &statement).await
    }

    pub async fn dimensional_time_series(
        &self,
        request: &ReportRequest,
    ) -> Result<Vec<DimensionalTimeSeriesPoint>> {
        metrics::dimensional_time_series(
            self,
            &request.filters,
            request.scalar_dimension()?,
            request.granularity()?,
        )
        .await
    }

    pub async fn conversion_funnel(&self, request: &ReportRequest) -> Result<ConversionFunnel> {
        conversion::funnel(self, &request.filters).await
    }

    pub async fn conversion_grouped(&self, request: &ReportRequest) -> Result<Vec<ConversionGroup>> {
        let statement = conversion::grouped_statement(self.config(), request)?;
        conversion::grouped(self, &statement).await
    }

    pub async fn cancellation_totals(&self, request: &ReportRequest) -> Result<CancellationTotals> {
        cancellations::totals(self, &request.filters).await
    }

    pub async fn cancellation_time_series(
        &self,
        request: &ReportRequest,
    ) -> Result<Vec<CancellationSeriesPoint>> {
        cancellations::time_series(self, &request.filters, request.granularity()?).await
    }

    pub async fn cancellation_grouped(
        &self,
        request: &ReportRequest,
    ) -> Result<Vec<CancellationGroup>> {
        cancellations::grouped(self, request).await
    }

    pub async fn cancellation_dimensional_time_series(
        &self,
        request: &ReportRequest,
    ) -> Result<Vec<CancellationDimensionalPoint>> {
        cancellations::dimensional_time_series(
            self,
            &request.filters,
            request.dimension()?,
            request.granularity()?,
        )
        .await
    }

    /// Resolves a city name to its internal id; `None` when unknown or when
    /// the lookup itself fails.
    pub async fn city_id(&self, name: &str) -> Option<String> {
        lookups::city_id(self, name).await
    }

    pub async fn filter_options(
        &self,
        dimension: Dimension,
        filters: &Filters,
    ) -> Result<FilterOptions> {
        lookups::filter_options(self, dimension, filters).await
    }

    pub fn translate(&self, request: TranslateRequest) -> Result<TranslateResponse> {
        translate_request(self.config(), request)
    }
}

pub fn translate_request(config: &AppConfig, request: TranslateRequest) -> Result<TranslateResponse> {
    let TranslateRequest { report, request } = request;
    let tables = &config.tables;

    let statements = match report {
        ReportKind::ExecutiveTotals => vec![metrics::executive_totals_statement(
            tables,
            &request.filters,
        )],
        ReportKind::Comparison => {
            let (current, previous) =
                time::comparison_periods(&request.filters, request.previous_period.clone())?;
            vec![
                metrics::executive_totals_statement(
                    tables,
                    &request.filters.with_period(current.date_from, current.date_to),
                ),
                metrics::executive_totals_statement(
                    tables,
                    &request.filters.with_period(previous.date_from, previous.date_to),
                ),
            ]
        }
        ReportKind::TimeSeries => vec![metrics::time_series_statement(
            tables,
            &request.filters,
            request.granularity()?,
        )],
        ReportKind::Grouped => vec![metrics::grouped_statement(config, &request)?],
        ReportKind::DimensionalTimeSeries => vec![metrics::dimensional_time_series_statement(
            tables,
            &request.filters,
            request.scalar_dimension()?,
            request.granularity()?,
        )],
        ReportKind::ConversionFunnel => {
            vec![conversion::funnel_statement(tables, &request.filters)]
        }
        ReportKind::ConversionGrouped => vec![conversion::grouped_statement(config, &request)?],
        ReportKind::CancellationTotals => {
            vec![cancellations::totals_statement(tables, &request.filters)]
        }
        ReportKind::CancellationTimeSeries => vec![cancellations::time_series_statement(
            tables,
            &request.filters,
            request.granularity()?,
        )],
        ReportKind::CancellationGrouped => {
            vec![cancellations::grouped_statement(config, &request)?]
        }
        ReportKind::CancellationDimensionalTimeSeries => {
            vec![cancellations::dimensional_time_series_statement(
                tables,
                &request.filters,
                request.dimension()?,
                request.granularity()?,
            )]
        }
    };

    Ok(TranslateResponse { report, statements })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::embedded("http://127.0.0.1:1".to_string(), "analytics".to_string())
    }

    fn translate(report: ReportKind, request: ReportRequest) -> Result<TranslateResponse> {
        translate_request(&config(), TranslateRequest { report, request })
    }

    fn busy_filters() -> Filters {
        Filters {
            date_from: Some("2024-01-01 00:00:00".into()),
            date_to: Some("2024-01-07 23:59:59".into()),
            city: vec!["Bangalore".into(), "Chennai".into()],
            merchant_id: vec!["m-1".into()],
            vehicle_category: Some(crate::vehicle::VehicleCategory::Auto),
            ..Filters::default()
        }
    }

    #[test]
    fn every_statement_binds_each_placeholder() {
        let cases = [
            (ReportKind::ExecutiveTotals, None),
            (ReportKind::Comparison, None),
            (ReportKind::TimeSeries, None),
            (ReportKind::Grouped, Some("city")),
            (ReportKind::DimensionalTimeSeries, Some("vehicle_category")),
            (ReportKind::ConversionFunnel, None),
            (ReportKind::ConversionGrouped, Some("flow_type")),
            (ReportKind::CancellationTotals, None),
            (ReportKind::CancellationTimeSeries, None),
            (ReportKind::CancellationGrouped, Some("reason_code")),
            (ReportKind::CancellationGrouped, Some("service_tier")),
            (ReportKind::CancellationDimensionalTimeSeries, Some("time_to_cancel_bkt")),
            (ReportKind::CancellationDimensionalTimeSeries, Some("trip_tag")),
        ];

        for (report, dimension) in cases {
            let request = ReportRequest {
                filters: busy_filters(),
                dimension: dimension.map(str::to_string),
                granularity: Some("hour".into()),
                ..ReportRequest::default()
            };
            let response = translate(report, request)
                .unwrap_or_else(|err| panic!("translation failed for {report:?}: {err:?}"));
            assert!(!response.statements.is_empty());
            for statement in response.statements {
                assert_eq!(
                    statement.sql.matches('?').count(),
                    statement.params.len(),
                    "placeholders must match params for {report:?}\nsql: {}\nparams: {:?}",
                    statement.sql,
                    statement.params
                );
            }
        }
    }

    #[test]
    fn comparison_issues_two_executive_queries() {
        let request = ReportRequest {
            filters: busy_filters(),
            ..ReportRequest::default()
        };
        let response = translate(ReportKind::Comparison, request).unwrap();
        assert_eq!(response.statements.len(), 2);
        assert_eq!(
            response.statements[0].params[0],
            SqlBindValue::Text("2024-01-01 00:00:00".into())
        );
        assert_eq!(
            response.statements[1].params[0],
            SqlBindValue::Text("2023-12-25 00:00:00".into())
        );
        assert_eq!(
            response.statements[1].params[1],
            SqlBindValue::Text("2023-12-31 23:59:59".into())
        );
    }

    #[test]
    fn comparison_current_period_binds_like_executive_totals() {
        let request = ReportRequest {
            filters: Filters {
                date_from: Some("2024-01-01T12:00:00+05:30".into()),
                date_to: Some("2024-01-01 23:59:59.999".into()),
                city: vec!["Pune".into()],
                ..Filters::default()
            },
            ..ReportRequest::default()
        };

        let executive = translate(ReportKind::ExecutiveTotals, request.clone()).unwrap();
        let comparison = translate(ReportKind::Comparison, request).unwrap();
        assert_eq!(comparison.statements[0], executive.statements[0]);
        assert_eq!(
            comparison.statements[0].params[..2],
            [
                SqlBindValue::Text("2024-01-01T12:00:00+05:30".into()),
                SqlBindValue::Text("2024-01-01 23:59:59.999".into()),
            ]
        );
    }

    #[test]
    fn grouped_requires_a_dimension() {
        let err = translate(ReportKind::Grouped, ReportRequest::default()).unwrap_err();
        assert!(err.to_string().contains("dimension is required"));
    }

    #[test]
    fn rejects_unknown_dimension() {
        let request = ReportRequest {
            dimension: Some("driver_rating".into()),
            ..ReportRequest::default()
        };
        let err = translate(ReportKind::Grouped, request).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn funnel_reports_reject_json_map_dimensions() {
        let request = ReportRequest {
            dimension: Some("reason_code".into()),
            ..ReportRequest::default()
        };
        let err = translate(ReportKind::DimensionalTimeSeries, request).unwrap_err();
        assert!(err.to_string().contains("only available for cancellations"));
    }

    #[test]
    fn rejects_unknown_sort_column_and_order() {
        let request = ReportRequest {
            dimension: Some("city".into()),
            sort_by: Some("drop table".into()),
            ..ReportRequest::default()
        };
        assert!(translate(ReportKind::Grouped, request).is_err());

        let request = ReportRequest {
            dimension: Some("city".into()),
            sort_order: Some("sideways".into()),
            ..ReportRequest::default()
        };
        assert!(translate(ReportKind::Grouped, request).is_err());
    }

    #[test]
    fn limit_is_clamped_to_configuration() {
        let config = config();
        let request = ReportRequest {
            limit: Some(1_000_000),
            ..ReportRequest::default()
        };
        assert_eq!(request.limit(&config), config.max_limit);
        assert_eq!(ReportRequest::default().limit(&config), config.default_limit);
        let zero = ReportRequest {
            limit: Some(0),
            ..ReportRequest::default()
        };
        assert_eq!(zero.limit(&config), 1);
    }

    #[test]
    fn query_string_form_parses_limit() {
        let query = ReportQuery {
            limit: Some("25".into()),
            dimension: Some("city".into()),
            ..ReportQuery::default()
        };
        let request = query.into_request().unwrap();
        assert_eq!(request.limit, Some(25));

        let query = ReportQuery {
            limit: Some("many".into()),
            ..ReportQuery::default()
        };
        assert!(query.into_request().is_err());
    }

    #[test]
    fn translate_request_deserializes_flat_body() {
        let request: TranslateRequest = serde_json::from_value(serde_json::json!({
            "report": "cancellation_grouped",
            "filters": { "city": ["Kolkata"] },
            "dimension": "reason_code",
            "sortOrder": "asc"
        }))
        .unwrap();
        assert_eq!(request.report, ReportKind::CancellationGrouped);
        assert_eq!(request.request.filters.city, vec!["Kolkata".to_string()]);
        assert_eq!(request.request.sort_order().unwrap(), SortOrder::Asc);
    }
}
