//! Funnel metrics: executive totals, comparisons, series and groupings.

use super::{
    counter_alias, from_filtered, nullable_float, AnalyticsEngine, ReportRequest, SqlBindValue,
    Statement,
};
use crate::{
    config::{AppConfig, TableConfig},
    dimension::{self, Dimension, Granularity},
    error::Result,
    filters::Filters,
    models::{
        ComparisonPeriodData, DimensionalTimeSeriesPoint, ExecutiveTotals, FunnelDimensionalRow,
        FunnelGroupedRow, FunnelSeriesRow, GroupedRow, Period, RawFunnelCounters,
        TimeSeriesPoint,
    },
};

const TIME_COLUMN: &str = "date";

/// Counter columns, in `RawFunnelCounters` field order.
const COUNTERS: [&str; 8] = [
    "searches",
    "search_tries",
    "quotes",
    "bookings",
    "completed_rides",
    "user_cancelled",
    "driver_cancelled",
    "earnings",
];

/// Counters that are only recorded on the synthetic `All` tier row.
const ALL_TIER_COUNTERS: [&str; 2] = ["searches", "search_tries"];

/// Searches happen before a tier is chosen, so the warehouse attributes
/// them to an `All` tier row alongside the per-tier rows. Summing across
/// every tier would count them twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TierMode {
    Plain,
    SplitAllTier,
}

impl TierMode {
    fn resolve(filters: &Filters, dimension: Option<Dimension>) -> Self {
        if filters.restricts_service_tier() || dimension.is_some_and(Dimension::is_tier_based) {
            TierMode::Plain
        } else {
            TierMode::SplitAllTier
        }
    }
}

fn counter_select(mode: TierMode) -> String {
    COUNTERS
        .iter()
        .map(|counter| {
            let aggregate = match mode {
                TierMode::Plain => format!("sum({counter})"),
                TierMode::SplitAllTier if ALL_TIER_COUNTERS.contains(counter) => {
                    format!("sumIf({counter}, service_tier = 'All')")
                }
                TierMode::SplitAllTier => format!("sumIf({counter}, service_tier != 'All')"),
            };
            format!("{} AS {}", nullable_float(&aggregate), counter_alias(counter))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub(super) fn executive_totals_statement(tables: &TableConfig, filters: &Filters) -> Statement {
    let (from, params) = from_filtered(&tables.funnel, filters, TIME_COLUMN);
    let counters = counter_select(TierMode::resolve(filters, None));
    Statement {
        sql: format!("SELECT {counters}\n{from}"),
        params,
    }
}

pub(super) fn time_series_statement(
    tables: &TableConfig,
    filters: &Filters,
    granularity: Granularity,
) -> Statement {
    let (from, params) = from_filtered(&tables.funnel, filters, TIME_COLUMN);
    let bucket = granularity.bucket();
    let timestamp = bucket.display(&bucket.truncate(TIME_COLUMN));
    let counters = counter_select(TierMode::resolve(filters, None));
    Statement {
        sql: format!(
            "SELECT {timestamp} AS timestamp, {counters}\n{from}\nGROUP BY timestamp\nORDER BY timestamp ASC"
        ),
        params,
    }
}

pub(super) fn grouped_statement(config: &AppConfig, request: &ReportRequest) -> Result<Statement> {
    let dimension = request.scalar_dimension()?;
    let sort_by = request.sort_counter(&COUNTERS, "searches")?;
    let sort_order = request.sort_order()?;
    let limit = request.limit(config);

    let filters = &request.filters;
    let (from, mut params) = from_filtered(&config.tables.funnel, filters, TIME_COLUMN);
    let expr = scalar_dimension_expr(dimension);
    let counters = counter_select(TierMode::resolve(filters, Some(dimension)));

    params.push(SqlBindValue::UInt(u64::from(limit)));
    Ok(Statement {
        sql: format!(
            "SELECT {expr} AS dimension_value, {counters}\n{from}\nGROUP BY dimension_value\nORDER BY {} {}, dimension_value ASC\nLIMIT ?",
            counter_alias(sort_by),
            sort_order.as_sql(),
        ),
        params,
    })
}

pub(super) fn dimensional_time_series_statement(
    tables: &TableConfig,
    filters: &Filters,
    dimension: Dimension,
    granularity: Granularity,
) -> Statement {
    let (from, params) = from_filtered(&tables.funnel, filters, TIME_COLUMN);
    let bucket = granularity.bucket();
    let timestamp = bucket.display(&bucket.truncate(TIME_COLUMN));
    let expr = scalar_dimension_expr(dimension);
    let counters = counter_select(TierMode::resolve(filters, Some(dimension)));
    Statement {
        sql: format!(
            "SELECT {timestamp} AS timestamp, {expr} AS dimension_value, {counters}\n{from}\nGROUP BY timestamp, dimension_value\nORDER BY timestamp ASC, dimension_value ASC"
        ),
        params,
    }
}

// JSON-map dimensions are rejected before a funnel statement is built.
fn scalar_dimension_expr(dimension: Dimension) -> String {
    dimension::scalar_expr(dimension).unwrap_or_else(|| "''".to_string())
}

pub(super) async fn executive_totals(
    engine: &AnalyticsEngine,
    filters: &Filters,
) -> Result<ExecutiveTotals> {
    let statement = executive_totals_statement(engine.tables(), filters);
    let row = engine
        .fetch_optional::<RawFunnelCounters>(&statement)
        .await?
        .unwrap_or_default();
    Ok(row.into())
}

pub(super) async fn comparison(
    engine: &AnalyticsEngine,
    filters: &Filters,
    current: Period,
    previous: Period,
) -> Result<ComparisonPeriodData> {
    let current_totals = executive_totals(
        engine,
        &filters.with_period(current.date_from.clone(), current.date_to.clone()),
    )
    .await?;
    let previous_totals = executive_totals(
        engine,
        &filters.with_period(previous.date_from.clone(), previous.date_to.clone()),
    )
    .await?;

    Ok(ComparisonPeriodData::new(
        current,
        previous,
        current_totals,
        previous_totals,
    ))
}

pub(super) async fn time_series(
    engine: &AnalyticsEngine,
    filters: &Filters,
    granularity: Granularity,
) -> Result<Vec<TimeSeriesPoint>> {
    let statement = time_series_statement(engine.tables(), filters, granularity);
    let rows = engine.fetch_all::<FunnelSeriesRow>(&statement).await?;
    Ok(rows.into_iter().map(TimeSeriesPoint::from).collect())
}

pub(super) async fn grouped(engine: &AnalyticsEngine, statement: &Statement) -> Result<Vec<GroupedRow>> {
    let rows = engine.fetch_all::<FunnelGroupedRow>(statement).await?;
    Ok(rows.into_iter().map(GroupedRow::from).collect())
}

pub(super) async fn dimensional_time_series(
    engine: &AnalyticsEngine,
    filters: &Filters,
    dimension: Dimension,
    granularity: Granularity,
) -> Result<Vec<DimensionalTimeSeriesPoint>> {
    let statement =
        dimensional_time_series_statement(engine.tables(), filters, dimension, granularity);
    let rows = engine.fetch_all::<FunnelDimensionalRow>(&statement).await?;
    Ok(rows.into_iter().map(DimensionalTimeSeriesPoint::from).collect())
}
