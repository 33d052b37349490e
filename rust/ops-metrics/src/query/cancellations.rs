//! Cancellation reports.
//!
//! Scalar dimensions group the counter columns directly. The JSON-map
//! dimensions (`reason_code` and the two bucket maps) hold `key -> count`
//! objects per row, so they are exploded in an inner query and summed per key
//! in an outer one. Only `bookings_cancelled` is meaningful for those rows.

use super::{
    counter_alias, counter_sums, from_filtered, nullable_float, AnalyticsEngine, ReportRequest,
    SqlBindValue, Statement,
};
use crate::{
    config::{AppConfig, TableConfig},
    dimension::{self, Dimension, Granularity, JsonMapPairs},
    error::Result,
    filters::Filters,
    models::{
        CancellationDimensionalPoint, CancellationDimensionalRow, CancellationGroup,
        CancellationGroupedRow, CancellationSeriesPoint, CancellationSeriesRow,
        CancellationTotals, JsonMapDimensionalRow, JsonMapGroupedRow, RawCancellationCounters,
    },
};

/// Counter columns, in `RawCancellationCounters` field order.
const COUNTERS: [&str; 4] = [
    "total_bookings",
    "user_cancelled",
    "driver_cancelled",
    "bookings_cancelled",
];

const JSON_MAP_COUNTER: &str = "bookings_cancelled";

pub(super) fn totals_statement(tables: &TableConfig, filters: &Filters) -> Statement {
    let (from, params) = from_filtered(
        &tables.cancellations,
        filters,
        &tables.cancellations_time_column,
    );
    Statement {
        sql: format!("SELECT {}\n{from}", counter_sums(&COUNTERS)),
        params,
    }
}

pub(super) fn time_series_statement(
    tables: &TableConfig,
    filters: &Filters,
    granularity: Granularity,
) -> Statement {
    let time_column = &tables.cancellations_time_column;
    let (from, params) = from_filtered(&tables.cancellations, filters, time_column);
    let bucket = granularity.bucket();
    let timestamp = bucket.display(&bucket.truncate(time_column));
    Statement {
        sql: format!(
            "SELECT {timestamp} AS timestamp, {}\n{from}\nGROUP BY timestamp\nORDER BY timestamp ASC",
            counter_sums(&COUNTERS)
        ),
        params,
    }
}

pub(super) fn grouped_statement(config: &AppConfig, request: &ReportRequest) -> Result<Statement> {
    let dimension = request.dimension()?;
    let sort_by = request.sort_counter(&COUNTERS, "bookings_cancelled")?;
    let sort_order = request.sort_order()?.as_sql();
    let limit = SqlBindValue::UInt(u64::from(request.limit(config)));

    let tables = &config.tables;
    let (from, mut params) = from_filtered(
        &tables.cancellations,
        &request.filters,
        &tables.cancellations_time_column,
    );

    let sql = match dimension::json_map_pairs(dimension) {
        Some(JsonMapPairs { pair, key, value }) => format!(
            "SELECT {key} AS dimension_value, {} AS {alias}\nFROM (SELECT {pair}\n{from})\nGROUP BY dimension_value\nORDER BY {alias} {sort_order}, dimension_value ASC\nLIMIT ?",
            nullable_float(&format!("sum({value})")),
            alias = counter_alias(JSON_MAP_COUNTER),
        ),
        None => format!(
            "SELECT {} AS dimension_value, {}\n{from}\nGROUP BY dimension_value\nORDER BY {} {sort_order}, dimension_value ASC\nLIMIT ?",
            dimension::scalar_expr(dimension).unwrap_or_else(|| "''".to_string()),
            counter_sums(&COUNTERS),
            counter_alias(sort_by),
        ),
    };

    params.push(limit);
    Ok(Statement { sql, params })
}

pub(super) fn dimensional_time_series_statement(
    tables: &TableConfig,
    filters: &Filters,
    dimension: Dimension,
    granularity: Granularity,
) -> Statement {
    let time_column = &tables.cancellations_time_column;
    let (from, params) = from_filtered(&tables.cancellations, filters, time_column);
    let bucket = granularity.bucket();

    let sql = match dimension::json_map_pairs(dimension) {
        Some(JsonMapPairs { pair, key, value }) => format!(
            "SELECT {} AS timestamp, {key} AS dimension_value, {} AS {}\nFROM (SELECT {} AS bucket, {pair}\n{from})\nGROUP BY timestamp, dimension_value\nORDER BY timestamp ASC, dimension_value ASC",
            bucket.display("bucket"),
            nullable_float(&format!("sum({value})")),
            counter_alias(JSON_MAP_COUNTER),
            bucket.truncate(time_column),
        ),
        None => format!(
            "SELECT {} AS timestamp, {} AS dimension_value, {}\n{from}\nGROUP BY timestamp, dimension_value\nORDER BY timestamp ASC, dimension_value ASC",
            bucket.display(&bucket.truncate(time_column)),
            dimension::scalar_expr(dimension).unwrap_or_else(|| "''".to_string()),
            counter_sums(&COUNTERS),
        ),
    };

    Statement { sql, params }
}

pub(super) async fn totals(engine: &AnalyticsEngine, filters: &Filters) -> Result<CancellationTotals> {
    let statement = totals_statement(engine.tables(), filters);
    let row = engine
        .fetch_optional::<RawCancellationCounters>(&statement)
        .await?
        .unwrap_or_default();
    Ok(row.into())
}

pub(super) async fn time_series(
    engine: &AnalyticsEngine,
    filters: &Filters,
    granularity: Granularity,
) -> Result<Vec<CancellationSeriesPoint>> {
    let statement = time_series_statement(engine.tables(), filters, granularity);
    let rows = engine.fetch_all::<CancellationSeriesRow>(&statement).await?;
    Ok(rows.into_iter().map(CancellationSeriesPoint::from).collect())
}

pub(super) async fn grouped(
    engine: &AnalyticsEngine,
    request: &ReportRequest,
) -> Result<Vec<CancellationGroup>> {
    let dimension = request.dimension()?;
    let statement = grouped_statement(engine.config(), request)?;

    if dimension.is_json_map() {
        let rows = engine.fetch_all::<JsonMapGroupedRow>(&statement).await?;
        Ok(rows.into_iter().map(CancellationGroup::from).collect())
    } else {
        let rows = engine.fetch_all::<CancellationGroupedRow>(&statement).await?;
        Ok(rows.into_iter().map(CancellationGroup::from).collect())
    }
}

pub(super) async fn dimensional_time_series(
    engine: &AnalyticsEngine,
    filters: &Filters,
    dimension: Dimension,
    granularity: Granularity,
) -> Result<Vec<CancellationDimensionalPoint>> {
    let statement =
        dimensional_time_series_statement(engine.tables(), filters, dimension, granularity);

    if dimension.is_json_map() {
        let rows = engine.fetch_all::<JsonMapDimensionalRow>(&statement).await?;
        Ok(rows.into_iter().map(CancellationDimensionalPoint::from).collect())
    } else {
        let rows = engine
            .fetch_all::<CancellationDimensionalRow>(&statement)
            .await?;
        Ok(rows.into_iter().map(CancellationDimensionalPoint::from).collect())
    }
}
