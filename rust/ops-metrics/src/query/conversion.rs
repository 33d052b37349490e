use super::{
    counter_alias, counter_sums, from_filtered, AnalyticsEngine, ReportRequest, SqlBindValue,
    Statement,
};
use crate::{
    config::{AppConfig, TableConfig},
    dimension,
    error::Result,
    filters::Filters,
    models::{ConversionFunnel, ConversionGroup, ConversionGroupedRow, RawConversionCounters},
};

const TIME_COLUMN: &str = "date";

/// Stage counter columns, top of the funnel first.
const COUNTERS: [&str; 7] = [
    "searches",
    "quotes",
    "quote_acceptances",
    "bookings",
    "driver_assigned",
    "rides_started",
    "completed_rides",
];

pub(super) fn funnel_statement(tables: &TableConfig, filters: &Filters) -> Statement {
    let (from, params) = from_filtered(&tables.conversion, filters, TIME_COLUMN);
    Statement {
        sql: format!("SELECT {}\n{from}", counter_sums(&COUNTERS)),
        params,
    }
}

pub(super) fn grouped_statement(config: &AppConfig, request: &ReportRequest) -> Result<Statement> {
    let dimension = request.scalar_dimension()?;
    let sort_by = request.sort_counter(&COUNTERS, "searches")?;
    let sort_order = request.sort_order()?;
    let limit = request.limit(config);

    let (from, mut params) = from_filtered(&config.tables.conversion, &request.filters, TIME_COLUMN);
    let expr = dimension::scalar_expr(dimension).unwrap_or_else(|| "''".to_string());
    params.push(SqlBindValue::UInt(u64::from(limit)));

    Ok(Statement {
        sql: format!(
            "SELECT {expr} AS dimension_value, {}\n{from}\nGROUP BY dimension_value\nORDER BY {} {}, dimension_value ASC\nLIMIT ?",
            counter_sums(&COUNTERS),
            counter_alias(sort_by),
            sort_order.as_sql(),
        ),
        params,
    })
}

pub(super) async fn funnel(engine: &AnalyticsEngine, filters: &Filters) -> Result<ConversionFunnel> {
    let statement = funnel_statement(engine.tables(), filters);
    let row = engine
        .fetch_optional::<RawConversionCounters>(&statement)
        .await?
        .unwrap_or_default();
    Ok(row.into())
}

pub(super) async fn grouped(
    engine: &AnalyticsEngine,
    statement: &Statement,
) -> Result<Vec<ConversionGroup>> {
    let rows = engine.fetch_all::<ConversionGroupedRow>(statement).await?;
    Ok(rows.into_iter().map(ConversionGroup::from).collect())
}
