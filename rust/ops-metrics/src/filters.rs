//! Request filters and their translation into a bound `WHERE` clause.

use crate::{
    error::{Result, ServiceError},
    query::SqlBindValue,
    vehicle::{self, VehicleCategory},
};
use serde::{Deserialize, Serialize};
use serde_with::{
    formats::{CommaSeparator, PreferMany},
    serde_as, DefaultOnNull, DisplayFromStr, OneOrMany, StringWithSeparator,
};

/// Restrictions applied to every report. All fields are optional and an empty
/// list means the same as an absent one.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub city: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, alias = "merchantIds", skip_serializing_if = "Vec::is_empty")]
    pub merchant_id: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow_type: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trip_tag: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_os_type: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_sdk_version: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_bundle_version: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_app_version: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_pricing_logic_version: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pooling_logic_version: Vec<String>,
    #[serde_as(as = "DefaultOnNull<OneOrMany<_, PreferMany>>")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_tier: Vec<String>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_category: Option<VehicleCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_sub_category: Option<String>,
}

/// Compiled filter: `sql` is either empty or starts with `WHERE`, and holds
/// exactly one `?` per entry in `binds`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub binds: Vec<SqlBindValue>,
}

impl WhereClause {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

impl Filters {
    /// List-valued filters in the order their conditions are emitted.
    fn list_columns(&self) -> [(&'static str, &[String]); 12] {
        [
            ("city", self.city.as_slice()),
            ("state", self.state.as_slice()),
            ("merchant_id", self.merchant_id.as_slice()),
            ("flow_type", self.flow_type.as_slice()),
            ("trip_tag", self.trip_tag.as_slice()),
            ("user_os_type", self.user_os_type.as_slice()),
            ("user_sdk_version", self.user_sdk_version.as_slice()),
            ("user_bundle_version", self.user_bundle_version.as_slice()),
            ("user_app_version", self.user_app_version.as_slice()),
            ("dynamic_pricing_logic_version", self.dynamic_pricing_logic_version.as_slice()),
            ("pooling_logic_version", self.pooling_logic_version.as_slice()),
            ("service_tier", self.service_tier.as_slice()),
        ]
    }

    /// True when any filter narrows the set of service tiers.
    pub fn restricts_service_tier(&self) -> bool {
        !present_values(&self.service_tier).is_empty()
            || non_empty(self.vehicle_sub_category.as_deref()).is_some()
            || self
                .vehicle_category
                .is_some_and(|category| category != VehicleCategory::All)
    }

    pub fn with_period(&self, date_from: String, date_to: String) -> Self {
        Self {
            date_from: Some(date_from),
            date_to: Some(date_to),
            ..self.clone()
        }
    }
}

pub fn compile_where(filters: &Filters, time_column: &str) -> WhereClause {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    if let Some(from) = non_empty(filters.date_from.as_deref()) {
        conditions.push(format!("{time_column} >= parseDateTimeBestEffort(?)"));
        binds.push(SqlBindValue::Text(from.to_string()));
    }

    if let Some(to) = non_empty(filters.date_to.as_deref()) {
        conditions.push(format!("{time_column} <= parseDateTimeBestEffort(?)"));
        binds.push(SqlBindValue::Text(to.to_string()));
    }

    for (column, values) in filters.list_columns() {
        let values = present_values(values);
        if values.is_empty() {
            continue;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        conditions.push(format!("{column} IN ({placeholders})"));
        binds.extend(values.into_iter().map(|value| SqlBindValue::Text(value.to_string())));
    }

    match filters.vehicle_category {
        None | Some(VehicleCategory::All) => {}
        Some(category) => {
            conditions.push(format!("{} = ?", vehicle::category_sql("service_tier")));
            binds.push(SqlBindValue::Text(category.as_str().to_string()));
        }
    }

    if let Some(tier) = non_empty(filters.vehicle_sub_category.as_deref()) {
        conditions.push("service_tier = ?".to_string());
        binds.push(SqlBindValue::Text(tier.to_string()));
    }

    if conditions.is_empty() {
        return WhereClause::default();
    }

    WhereClause {
        sql: format!("WHERE {}", conditions.join(" AND ")),
        binds,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Trimmed entries of a list filter with blanks dropped.
fn present_values(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Filters as they arrive on a query string: lists are comma separated.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub city: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub state: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default, alias = "merchantIds")]
    pub merchant_id: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub flow_type: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub trip_tag: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub user_os_type: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub user_sdk_version: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub user_bundle_version: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub user_app_version: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub dynamic_pricing_logic_version: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub pooling_logic_version: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    #[serde(default)]
    pub service_tier: Option<Vec<String>>,
    #[serde(default)]
    pub vehicle_category: Option<String>,
    #[serde(default)]
    pub vehicle_sub_category: Option<String>,
}

impl FilterQuery {
    pub fn into_filters(self) -> Result<Filters> {
        let vehicle_category = non_empty(self.vehicle_category.as_deref())
            .map(|raw| raw.parse::<VehicleCategory>())
            .transpose()
            .map_err(ServiceError::InvalidRequest)?;

        Ok(Filters {
            date_from: self.date_from,
            date_to: self.date_to,
            city: clean_list(self.city),
            state: clean_list(self.state),
            merchant_id: clean_list(self.merchant_id),
            flow_type: clean_list(self.flow_type),
            trip_tag: clean_list(self.trip_tag),
            user_os_type: clean_list(self.user_os_type),
            user_sdk_version: clean_list(self.user_sdk_version),
            user_bundle_version: clean_list(self.user_bundle_version),
            user_app_version: clean_list(self.user_app_version),
            dynamic_pricing_logic_version: clean_list(self.dynamic_pricing_logic_version),
            pooling_logic_version: clean_list(self.pooling_logic_version),
            service_tier: clean_list(self.service_tier),
            vehicle_category,
            vehicle_sub_category: self.vehicle_sub_category,
        })
    }
}

fn clean_list(values: Option<Vec<String>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
