//! Grouping dimensions and time bucketing.

use crate::vehicle;
use serde::Serialize;
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ServiceTier,
    VehicleCategory,
    FlowType,
    City,
    State,
    MerchantId,
    TripTag,
    UserOsType,
    UserSdkVersion,
    UserBundleVersion,
    UserAppVersion,
    DynamicPricingLogicVersion,
    PoolingLogicVersion,
    PickupDistLeftBucket,
    TimeToCancelBkt,
    ReasonCode,
}

/// How a dimension's value is read from a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Scalar column grouped directly.
    Column(&'static str),
    /// Category derived from `service_tier`.
    VehicleCategory,
    /// JSON object column of `key -> count`, exploded into one row per key.
    JsonMap(&'static str),
}

impl Dimension {
    pub const ALL: [Dimension; 16] = [
        Dimension::ServiceTier,
        Dimension::VehicleCategory,
        Dimension::FlowType,
        Dimension::City,
        Dimension::State,
        Dimension::MerchantId,
        Dimension::TripTag,
        Dimension::UserOsType,
        Dimension::UserSdkVersion,
        Dimension::UserBundleVersion,
        Dimension::UserAppVersion,
        Dimension::DynamicPricingLogicVersion,
        Dimension::PoolingLogicVersion,
        Dimension::PickupDistLeftBucket,
        Dimension::TimeToCancelBkt,
        Dimension::ReasonCode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::ServiceTier => "service_tier",
            Dimension::VehicleCategory => "vehicle_category",
            Dimension::FlowType => "flow_type",
            Dimension::City => "city",
            Dimension::State => "state",
            Dimension::MerchantId => "merchant_id",
            Dimension::TripTag => "trip_tag",
            Dimension::UserOsType => "user_os_type",
            Dimension::UserSdkVersion => "user_sdk_version",
            Dimension::UserBundleVersion => "user_bundle_version",
            Dimension::UserAppVersion => "user_app_version",
            Dimension::DynamicPricingLogicVersion => "dynamic_pricing_logic_version",
            Dimension::PoolingLogicVersion => "pooling_logic_version",
            Dimension::PickupDistLeftBucket => "pickup_dist_left_bucket",
            Dimension::TimeToCancelBkt => "time_to_cancel_bkt",
            Dimension::ReasonCode => "reason_code",
        }
    }

    pub fn extraction(self) -> Extraction {
        match self {
            Dimension::VehicleCategory => Extraction::VehicleCategory,
            Dimension::PickupDistLeftBucket
            | Dimension::TimeToCancelBkt
            | Dimension::ReasonCode => Extraction::JsonMap(self.as_str()),
            other => Extraction::Column(other.as_str()),
        }
    }

    pub fn is_json_map(self) -> bool {
        matches!(self.extraction(), Extraction::JsonMap(_))
    }

    /// Dimensions whose groups are service tiers or collections of them.
    pub fn is_tier_based(self) -> bool {
        matches!(self, Dimension::ServiceTier | Dimension::VehicleCategory)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    /// Accepts `snake_case` as well as the `camelCase` spelling used by the UI.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted: String = value
            .trim()
            .chars()
            .filter(|ch| *ch != '_')
            .flat_map(char::to_lowercase)
            .collect();

        Dimension::ALL
            .into_iter()
            .find(|dimension| dimension.as_str().replace('_', "") == wanted)
            .ok_or_else(|| format!("unsupported dimension '{value}'"))
    }
}

/// Grouping expression for a scalar dimension.
///
/// Callers must route JSON-map dimensions through [`JsonMapPairs`] instead;
/// their shape needs a nested query and cannot be grouped on directly.
pub fn scalar_expr(dimension: Dimension) -> Option<String> {
    match dimension.extraction() {
        Extraction::Column(column) => Some(format!("ifNull(toString({column}), '')")),
        Extraction::VehicleCategory => Some(vehicle::category_sql("service_tier")),
        Extraction::JsonMap(_) => None,
    }
}

/// Expressions for exploding a JSON `key -> count` column.
///
/// `pair` belongs in the inner query's select list; `key` and `value` read the
/// tuple it produces from the outer query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonMapPairs {
    pub pair: String,
    pub key: &'static str,
    pub value: &'static str,
}

pub fn json_map_pairs(dimension: Dimension) -> Option<JsonMapPairs> {
    match dimension.extraction() {
        Extraction::JsonMap(column) => Some(JsonMapPairs {
            pair: format!(
                "arrayJoin(JSONExtractKeysAndValues(ifNull({column}, '{{}}'), 'Float64')) AS kv"
            ),
            key: "tupleElement(kv, 1)",
            value: "tupleElement(kv, 2)",
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "day" | "daily" => Ok(Granularity::Day),
            other => Err(format!("unsupported granularity '{other}'")),
        }
    }
}

/// Truncation function and display format for one granularity. They come from
/// the same match so an hourly bucket always renders with its hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucket {
    pub function: &'static str,
    pub display_format: &'static str,
}

impl Granularity {
    pub fn bucket(self) -> TimeBucket {
        match self {
            Granularity::Hour => TimeBucket {
                function: "toStartOfHour",
                display_format: "%Y-%m-%d %H:%i:%S",
            },
            Granularity::Day => TimeBucket {
                function: "toStartOfDay",
                display_format: "%Y-%m-%d",
            },
        }
    }
}

impl TimeBucket {
    pub fn truncate(&self, column: &str) -> String {
        format!("{}(toDateTime({column}))", self.function)
    }

    pub fn display(&self, bucket: &str) -> String {
        format!("formatDateTime({bucket}, '{}')", self.display_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snake_and_camel_case() {
        assert_eq!("service_tier".parse::<Dimension>(), Ok(Dimension::ServiceTier));
        assert_eq!("serviceTier".parse::<Dimension>(), Ok(Dimension::ServiceTier));
        assert_eq!("reasonCode".parse::<Dimension>(), Ok(Dimension::ReasonCode));
        assert!("driver_name".parse::<Dimension>().is_err());
    }

    #[test]
    fn every_dimension_round_trips_through_its_name() {
        for dimension in Dimension::ALL {
            assert_eq!(dimension.as_str().parse::<Dimension>(), Ok(dimension));
        }
    }

    #[test]
    fn only_cancellation_maps_are_json() {
        let json: Vec<_> = Dimension::ALL
            .into_iter()
            .filter(|dimension| dimension.is_json_map())
            .collect();
        assert_eq!(
            json,
            vec![
                Dimension::PickupDistLeftBucket,
                Dimension::TimeToCancelBkt,
                Dimension::ReasonCode
            ]
        );
        for dimension in json {
            assert!(scalar_expr(dimension).is_none());
            assert!(json_map_pairs(dimension).is_some());
        }
    }

    #[test]
    fn scalar_dimensions_group_on_their_column() {
        assert_eq!(
            scalar_expr(Dimension::FlowType).as_deref(),
            Some("ifNull(toString(flow_type), '')")
        );
        assert!(scalar_expr(Dimension::VehicleCategory)
            .unwrap()
            .starts_with("multiIf("));
        assert!(json_map_pairs(Dimension::City).is_none());
    }

    #[test]
    fn json_map_pairs_explode_the_column() {
        let pairs = json_map_pairs(Dimension::ReasonCode).unwrap();
        assert_eq!(
            pairs.pair,
            "arrayJoin(JSONExtractKeysAndValues(ifNull(reason_code, '{}'), 'Float64')) AS kv"
        );
    }

    #[test]
    fn hourly_format_has_time_of_day() {
        let bucket = Granularity::Hour.bucket();
        assert!(bucket.display_format.contains("%H"));
        assert!(bucket.display_format.contains("%i"));
        assert_eq!(bucket.function, "toStartOfHour");
    }

    #[test]
    fn daily_format_has_no_time_of_day() {
        let bucket = Granularity::Day.bucket();
        for token in ["%H", "%i", "%S"] {
            assert!(!bucket.display_format.contains(token));
        }
        assert_eq!(bucket.function, "toStartOfDay");
        assert_eq!(
            bucket.display(&bucket.truncate("date")),
            "formatDateTime(toStartOfDay(toDateTime(date)), '%Y-%m-%d')"
        );
    }

    #[test]
    fn parses_granularity() {
        assert_eq!("HOUR".parse::<Granularity>(), Ok(Granularity::Hour));
        assert_eq!("daily".parse::<Granularity>(), Ok(Granularity::Day));
        assert!("week".parse::<Granularity>().is_err());
    }
}
