use super::{from_filtered, AnalyticsEngine, SqlBindValue, Statement};
use crate::{
    config::{AppConfig, TableConfig},
    dimension::{self, Dimension, Extraction},
    error::Result,
    filters::Filters,
    models::{CityIdRow, OptionValueRow},
    vehicle::VehicleCategory,
};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub dimension: Dimension,
    pub values: Vec<String>,
}

pub(super) fn city_id_statement(tables: &TableConfig, name: &str) -> Statement {
    Statement {
        sql: format!(
            "SELECT toString(city_id) AS city_id\nFROM {}\nWHERE lower(city_name) = lower(?)\nLIMIT 1",
            tables.cities
        ),
        params: vec![SqlBindValue::Text(name.trim().to_string())],
    }
}

pub(super) async fn city_id(engine: &AnalyticsEngine, name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }

    let statement = city_id_statement(engine.tables(), name);
    match engine.fetch_optional::<CityIdRow>(&statement).await {
        Ok(row) => row.map(|row| row.city_id),
        Err(err) => {
            warn!(city = %name, error = ?err, "city lookup failed");
            None
        }
    }
}

/// Distinct non-empty values for a dimension. Returns `None` for
/// `vehicle_category`, whose values are the static category names.
pub(super) fn filter_options_statement(
    config: &AppConfig,
    dimension: Dimension,
    filters: &Filters,
) -> Option<Statement> {
    let tables = &config.tables;
    let (value, from, mut params) = match dimension.extraction() {
        Extraction::VehicleCategory => return None,
        Extraction::JsonMap(column) => {
            let (from, params) =
                from_filtered(&tables.cancellations, filters, &tables.cancellations_time_column);
            (
                format!("arrayJoin(JSONExtractKeys(ifNull({column}, '{{}}')))"),
                from,
                params,
            )
        }
        Extraction::Column(_) => {
            let (from, params) = from_filtered(&tables.funnel, filters, "date");
            (dimension::scalar_expr(dimension)?, from, params)
        }
    };

    params.push(SqlBindValue::UInt(u64::from(config.max_limit)));
    Some(Statement {
        sql: format!(
            "SELECT DISTINCT {value} AS value\n{from}\nORDER BY value ASC\nLIMIT ?"
        ),
        params,
    })
}

pub(super) async fn filter_options(
    engine: &AnalyticsEngine,
    dimension: Dimension,
    filters: &Filters,
) -> Result<FilterOptions> {
    let Some(statement) = filter_options_statement(engine.config(), dimension, filters) else {
        return Ok(FilterOptions {
            dimension,
            values: VehicleCategory::ALL
                .iter()
                .map(|category| category.as_str().to_string())
                .collect(),
        });
    };

    let rows = engine.fetch_all::<OptionValueRow>(&statement).await?;
    Ok(FilterOptions {
        dimension,
        values: rows
            .into_iter()
            .map(|row| row.value)
            .filter(|value| !value.is_empty())
            .collect(),
    })
}
