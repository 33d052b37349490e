//! Warehouse row shapes and the response objects built from them.
//!
//! Row structs mirror the select lists in `query::*` column for column; every
//! aggregate is selected as `Nullable(Float64)` and every label as `String`.

use crate::normalize::{
    absolute_change, coerce_amount, coerce_count, percent_change, rate,
};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Row, Deserialize)]
pub struct RawFunnelCounters {
    pub searches: Option<f64>,
    pub search_tries: Option<f64>,
    pub quotes: Option<f64>,
    pub bookings: Option<f64>,
    pub completed_rides: Option<f64>,
    pub user_cancelled: Option<f64>,
    pub driver_cancelled: Option<f64>,
    pub earnings: Option<f64>,
}

#[derive(Debug, Row, Deserialize)]
pub struct FunnelSeriesRow {
    pub timestamp: String,
    pub counters: RawFunnelCounters,
}

#[derive(Debug, Row, Deserialize)]
pub struct FunnelGroupedRow {
    pub dimension_value: String,
    pub counters: RawFunnelCounters,
}

#[derive(Debug, Row, Deserialize)]
pub struct FunnelDimensionalRow {
    pub timestamp: String,
    pub dimension_value: String,
    pub counters: RawFunnelCounters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FunnelCounters {
    pub searches: u64,
    pub search_tries: u64,
    pub quotes: u64,
    pub bookings: u64,
    pub completed_rides: u64,
    pub user_cancelled: u64,
    pub driver_cancelled: u64,
    pub earnings: f64,
}

impl From<RawFunnelCounters> for FunnelCounters {
    fn from(raw: RawFunnelCounters) -> Self {
        Self {
            searches: coerce_count(raw.searches),
            search_tries: coerce_count(raw.search_tries),
            quotes: coerce_count(raw.quotes),
            bookings: coerce_count(raw.bookings),
            completed_rides: coerce_count(raw.completed_rides),
            user_cancelled: coerce_count(raw.user_cancelled),
            driver_cancelled: coerce_count(raw.driver_cancelled),
            earnings: coerce_amount(raw.earnings),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FunnelRates {
    /// completed rides / searches
    pub conversion_rate: f64,
    /// bookings / searches
    pub booking_rate: f64,
    /// bookings / quotes
    pub quote_acceptance_rate: f64,
    /// completed rides / bookings
    pub ride_completion_rate: f64,
    pub user_cancellation_rate: f64,
    pub driver_cancellation_rate: f64,
    pub earnings_per_ride: f64,
}

impl FunnelRates {
    pub fn from_counters(counters: &FunnelCounters) -> Self {
        let searches = counters.searches as f64;
        let bookings = counters.bookings as f64;
        let completed = counters.completed_rides as f64;
        Self {
            conversion_rate: rate(completed, searches),
            booking_rate: rate(bookings, searches),
            quote_acceptance_rate: rate(bookings, counters.quotes as f64),
            ride_completion_rate: rate(completed, bookings),
            user_cancellation_rate: rate(counters.user_cancelled as f64, bookings),
            driver_cancellation_rate: rate(counters.driver_cancelled as f64, bookings),
            earnings_per_ride: rate(counters.earnings, completed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutiveTotals {
    #[serde(flatten)]
    pub counters: FunnelCounters,
    #[serde(flatten)]
    pub rates: FunnelRates,
}

impl From<RawFunnelCounters> for ExecutiveTotals {
    fn from(raw: RawFunnelCounters) -> Self {
        let counters = FunnelCounters::from(raw);
        Self {
            rates: FunnelRates::from_counters(&counters),
            counters,
        }
    }
}

impl ExecutiveTotals {
    /// Every reported metric by name, in a stable order.
    pub fn metric_values(&self) -> [(&'static str, f64); 15] {
        let c = &self.counters;
        let r = &self.rates;
        [
            ("searches", c.searches as f64),
            ("search_tries", c.search_tries as f64),
            ("quotes", c.quotes as f64),
            ("bookings", c.bookings as f64),
            ("completed_rides", c.completed_rides as f64),
            ("user_cancelled", c.user_cancelled as f64),
            ("driver_cancelled", c.driver_cancelled as f64),
            ("earnings", c.earnings),
            ("conversion_rate", r.conversion_rate),
            ("booking_rate", r.booking_rate),
            ("quote_acceptance_rate", r.quote_acceptance_rate),
            ("ride_completion_rate", r.ride_completion_rate),
            ("user_cancellation_rate", r.user_cancellation_rate),
            ("driver_cancellation_rate", r.driver_cancellation_rate),
            ("earnings_per_ride", r.earnings_per_ride),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: String,
    #[serde(flatten)]
    pub totals: ExecutiveTotals,
}

impl From<FunnelSeriesRow> for TimeSeriesPoint {
    fn from(row: FunnelSeriesRow) -> Self {
        Self {
            timestamp: row.timestamp,
            totals: row.counters.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedRow {
    pub dimension_value: String,
    #[serde(flatten)]
    pub totals: ExecutiveTotals,
}

impl From<FunnelGroupedRow> for GroupedRow {
    fn from(row: FunnelGroupedRow) -> Self {
        Self {
            dimension_value: row.dimension_value,
            totals: row.counters.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionalTimeSeriesPoint {
    pub timestamp: String,
    pub dimension_value: String,
    #[serde(flatten)]
    pub totals: ExecutiveTotals,
}

impl From<FunnelDimensionalRow> for DimensionalTimeSeriesPoint {
    fn from(row: FunnelDimensionalRow) -> Self {
        Self {
            timestamp: row.timestamp,
            dimension_value: row.dimension_value,
            totals: row.counters.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub date_from: String,
    pub date_to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricDelta {
    pub current: f64,
    pub previous: f64,
    pub absolute_change: f64,
    pub percent_change: f64,
}

impl MetricDelta {
    pub fn between(current: f64, previous: f64) -> Self {
        Self {
            current,
            previous,
            absolute_change: absolute_change(current, previous),
            percent_change: percent_change(current, previous),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonPeriodData {
    pub current_period: Period,
    pub previous_period: Period,
    pub current: ExecutiveTotals,
    pub previous: ExecutiveTotals,
    pub deltas: BTreeMap<&'static str, MetricDelta>,
}

impl ComparisonPeriodData {
    pub fn new(
        current_period: Period,
        previous_period: Period,
        current: ExecutiveTotals,
        previous: ExecutiveTotals,
    ) -> Self {
        let deltas = current
            .metric_values()
            .into_iter()
            .zip(previous.metric_values())
            .map(|((name, now), (_, before))| (name, MetricDelta::between(now, before)))
            .collect();

        Self {
            current_period,
            previous_period,
            current,
            previous,
            deltas,
        }
    }
}

#[derive(Debug, Clone, Default, Row, Deserialize)]
pub struct RawConversionCounters {
    pub searches: Option<f64>,
    pub quotes: Option<f64>,
    pub quote_acceptances: Option<f64>,
    pub bookings: Option<f64>,
    pub driver_assigned: Option<f64>,
    pub rides_started: Option<f64>,
    pub completed_rides: Option<f64>,
}

#[derive(Debug, Row, Deserialize)]
pub struct ConversionGroupedRow {
    pub dimension_value: String,
    pub counters: RawConversionCounters,
}

/// Funnel stage names, top of the funnel first.
pub const CONVERSION_STAGES: [&str; 7] = [
    "search",
    "quote",
    "quote_accepted",
    "booking",
    "driver_assigned",
    "ride_started",
    "ride_completed",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStage {
    pub stage: &'static str,
    pub count: u64,
    /// count / previous stage count
    pub step_conversion_rate: f64,
    /// count / first stage count
    pub overall_conversion_rate: f64,
    pub drop_off: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionFunnel {
    pub stages: Vec<FunnelStage>,
    pub overall_conversion_rate: f64,
}

impl From<RawConversionCounters> for ConversionFunnel {
    fn from(raw: RawConversionCounters) -> Self {
        let counts = [
            coerce_count(raw.searches),
            coerce_count(raw.quotes),
            coerce_count(raw.quote_acceptances),
            coerce_count(raw.bookings),
            coerce_count(raw.driver_assigned),
            coerce_count(raw.rides_started),
            coerce_count(raw.completed_rides),
        ];
        let top = counts[0] as f64;

        let stages = CONVERSION_STAGES
            .into_iter()
            .zip(counts)
            .enumerate()
            .map(|(index, (stage, count))| {
                let previous = if index == 0 { count } else { counts[index - 1] };
                FunnelStage {
                    stage,
                    count,
                    step_conversion_rate: rate(count as f64, previous as f64),
                    overall_conversion_rate: rate(count as f64, top),
                    drop_off: previous.saturating_sub(count),
                }
            })
            .collect();

        Self {
            stages,
            overall_conversion_rate: rate(counts[counts.len() - 1] as f64, top),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionGroup {
    pub dimension_value: String,
    #[serde(flatten)]
    pub funnel: ConversionFunnel,
}

impl From<ConversionGroupedRow> for ConversionGroup {
    fn from(row: ConversionGroupedRow) -> Self {
        Self {
            dimension_value: row.dimension_value,
            funnel: row.counters.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Row, Deserialize)]
pub struct RawCancellationCounters {
    pub total_bookings: Option<f64>,
    pub user_cancelled: Option<f64>,
    pub driver_cancelled: Option<f64>,
    pub bookings_cancelled: Option<f64>,
}

#[derive(Debug, Row, Deserialize)]
pub struct CancellationSeriesRow {
    pub timestamp: String,
    pub counters: RawCancellationCounters,
}

#[derive(Debug, Row, Deserialize)]
pub struct CancellationGroupedRow {
    pub dimension_value: String,
    pub counters: RawCancellationCounters,
}

#[derive(Debug, Row, Deserialize)]
pub struct CancellationDimensionalRow {
    pub timestamp: String,
    pub dimension_value: String,
    pub counters: RawCancellationCounters,
}

/// One exploded key of a JSON-map column, summed over a group.
#[derive(Debug, Row, Deserialize)]
pub struct JsonMapGroupedRow {
    pub dimension_value: String,
    pub bookings_cancelled: Option<f64>,
}

#[derive(Debug, Row, Deserialize)]
pub struct JsonMapDimensionalRow {
    pub timestamp: String,
    pub dimension_value: String,
    pub bookings_cancelled: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CancellationCounters {
    pub total_bookings: u64,
    pub user_cancelled: u64,
    pub driver_cancelled: u64,
    pub bookings_cancelled: u64,
}

impl From<RawCancellationCounters> for CancellationCounters {
    fn from(raw: RawCancellationCounters) -> Self {
        Self {
            total_bookings: coerce_count(raw.total_bookings),
            user_cancelled: coerce_count(raw.user_cancelled),
            driver_cancelled: coerce_count(raw.driver_cancelled),
            bookings_cancelled: coerce_count(raw.bookings_cancelled),
        }
    }
}

impl CancellationCounters {
    /// JSON-map columns only carry cancellation counts; the remaining
    /// counters cannot be attributed to a key and stay at zero.
    pub fn from_json_map_value(bookings_cancelled: Option<f64>) -> Self {
        Self {
            bookings_cancelled: coerce_count(bookings_cancelled),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CancellationRates {
    pub cancellation_rate: f64,
    pub user_cancellation_rate: f64,
    pub driver_cancellation_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CancellationTotals {
    #[serde(flatten)]
    pub counters: CancellationCounters,
    #[serde(flatten)]
    pub rates: CancellationRates,
}

impl From<CancellationCounters> for CancellationTotals {
    fn from(counters: CancellationCounters) -> Self {
        let bookings = counters.total_bookings as f64;
        Self {
            rates: CancellationRates {
                cancellation_rate: rate(counters.bookings_cancelled as f64, bookings),
                user_cancellation_rate: rate(counters.user_cancelled as f64, bookings),
                driver_cancellation_rate: rate(counters.driver_cancelled as f64, bookings),
            },
            counters,
        }
    }
}

impl From<RawCancellationCounters> for CancellationTotals {
    fn from(raw: RawCancellationCounters) -> Self {
        CancellationCounters::from(raw).into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationSeriesPoint {
    pub timestamp: String,
    #[serde(flatten)]
    pub totals: CancellationTotals,
}

impl From<CancellationSeriesRow> for CancellationSeriesPoint {
    fn from(row: CancellationSeriesRow) -> Self {
        Self {
            timestamp: row.timestamp,
            totals: row.counters.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationGroup {
    pub dimension_value: String,
    #[serde(flatten)]
    pub totals: CancellationTotals,
}

impl From<CancellationGroupedRow> for CancellationGroup {
    fn from(row: CancellationGroupedRow) -> Self {
        Self {
            dimension_value: row.dimension_value,
            totals: row.counters.into(),
        }
    }
}

impl From<JsonMapGroupedRow> for CancellationGroup {
    fn from(row: JsonMapGroupedRow) -> Self {
        Self {
            dimension_value: row.dimension_value,
            totals: CancellationCounters::from_json_map_value(row.bookings_cancelled).into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationDimensionalPoint {
    pub timestamp: String,
    pub dimension_value: String,
    #[serde(flatten)]
    pub totals: CancellationTotals,
}

impl From<CancellationDimensionalRow> for CancellationDimensionalPoint {
    fn from(row: CancellationDimensionalRow) -> Self {
        Self {
            timestamp: row.timestamp,
            dimension_value: row.dimension_value,
            totals: row.counters.into(),
        }
    }
}

impl From<JsonMapDimensionalRow> for CancellationDimensionalPoint {
    fn from(row: JsonMapDimensionalRow) -> Self {
        Self {
            timestamp: row.timestamp,
            dimension_value: row.dimension_value,
            totals: CancellationCounters::from_json_map_value(row.bookings_cancelled).into(),
        }
    }
}

#[derive(Debug, Row, Deserialize)]
pub struct CityIdRow {
    pub city_id: String,
}

#[derive(Debug, Row, Deserialize)]
pub struct OptionValueRow {
    pub value: String,
}
