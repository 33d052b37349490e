//! Service tier to vehicle category mapping.
//!
//! The same pattern table drives both the Rust-side lookup and the SQL
//! expression used to group or filter by category, so a tier can never land
//! in one bucket in the API and another in the warehouse.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleCategory {
    Bike,
    Auto,
    Cab,
    Others,
    All,
    BookAny,
}

impl VehicleCategory {
    pub const ALL: [VehicleCategory; 6] = [
        VehicleCategory::Bike,
        VehicleCategory::Auto,
        VehicleCategory::Cab,
        VehicleCategory::Others,
        VehicleCategory::All,
        VehicleCategory::BookAny,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleCategory::Bike => "Bike",
            VehicleCategory::Auto => "Auto",
            VehicleCategory::Cab => "Cab",
            VehicleCategory::Others => "Others",
            VehicleCategory::All => "All",
            VehicleCategory::BookAny => "BookAny",
        }
    }
}

impl fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_tier(value);
        VehicleCategory::ALL
            .into_iter()
            .find(|category| normalize_tier(category.as_str()) == wanted)
            .ok_or_else(|| format!("unknown vehicle category '{value}'"))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TierPattern {
    Contains(&'static str),
    Equals(&'static str),
}

/// Checked in order; the first match wins and anything unmatched is a cab.
pub(crate) const CATEGORY_PATTERNS: &[(TierPattern, VehicleCategory)] = &[
    (TierPattern::Contains("bike"), VehicleCategory::Bike),
    (TierPattern::Contains("auto"), VehicleCategory::Auto),
    (TierPattern::Contains("ambulance"), VehicleCategory::Others),
    (TierPattern::Equals("all"), VehicleCategory::All),
    (TierPattern::Equals("bookany"), VehicleCategory::BookAny),
];

pub(crate) const FALLBACK_CATEGORY: VehicleCategory = VehicleCategory::Cab;

/// Tier names as they appear in the `service_tier` column.
pub const SERVICE_TIERS: &[(&str, VehicleCategory)] = &[
    ("Bike Taxi", VehicleCategory::Bike),
    ("Bike", VehicleCategory::Bike),
    ("Delivery Bike", VehicleCategory::Bike),
    ("Auto", VehicleCategory::Auto),
    ("EV Auto Rickshaw", VehicleCategory::Auto),
    ("Auto Rickshaw", VehicleCategory::Auto),
    ("AC Mini", VehicleCategory::Cab),
    ("Non-AC Mini", VehicleCategory::Cab),
    ("Hatchback", VehicleCategory::Cab),
    ("Sedan", VehicleCategory::Cab),
    ("AC Sedan", VehicleCategory::Cab),
    ("Premium Sedan", VehicleCategory::Cab),
    ("SUV", VehicleCategory::Cab),
    ("XL Cab", VehicleCategory::Cab),
    ("Black", VehicleCategory::Cab),
    ("Black XL", VehicleCategory::Cab),
    ("Eco", VehicleCategory::Cab),
    ("Comfy", VehicleCategory::Cab),
    ("Taxi", VehicleCategory::Cab),
    ("Taxi Plus", VehicleCategory::Cab),
    ("Ambulance Taxi", VehicleCategory::Others),
    ("Ambulance Taxi Oxygen", VehicleCategory::Others),
    ("Ambulance AC", VehicleCategory::Others),
    ("Ambulance AC Oxygen", VehicleCategory::Others),
    ("Ambulance Ventilator", VehicleCategory::Others),
    ("All", VehicleCategory::All),
    ("Book Any", VehicleCategory::BookAny),
];

/// ASCII-lowercases and drops spaces, underscores and dashes. Non-ASCII
/// characters pass through untouched, as they do under ClickHouse `lower()`.
fn normalize_tier(tier: &str) -> String {
    tier.chars()
        .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

pub fn vehicle_category(service_tier: &str) -> VehicleCategory {
    let normalized = normalize_tier(service_tier);
    CATEGORY_PATTERNS
        .iter()
        .find(|(pattern, _)| match pattern {
            TierPattern::Contains(needle) => normalized.contains(needle),
            TierPattern::Equals(expected) => normalized == *expected,
        })
        .map(|(_, category)| *category)
        .unwrap_or(FALLBACK_CATEGORY)
}

pub fn service_tiers_for(category: VehicleCategory) -> Vec<&'static str> {
    SERVICE_TIERS
        .iter()
        .filter(|(_, tier_category)| *tier_category == category)
        .map(|(tier, _)| *tier)
        .collect()
}

/// One category with the tiers that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTiers {
    pub category: VehicleCategory,
    pub service_tiers: Vec<&'static str>,
}

pub fn category_tiers() -> Vec<CategoryTiers> {
    VehicleCategory::ALL
        .into_iter()
        .map(|category| CategoryTiers {
            category,
            service_tiers: service_tiers_for(category),
        })
        .collect()
}

/// SQL expression that evaluates `column` to its category name, mirroring
/// [`vehicle_category`]. Only static patterns are spliced in.
pub(crate) fn category_sql(column: &str) -> String {
    let normalized = format!("replaceRegexpAll(lower(ifNull({column}, '')), '[ _-]', '')");
    let mut branches = Vec::with_capacity(CATEGORY_PATTERNS.len());
    for (pattern, category) in CATEGORY_PATTERNS {
        let condition = match pattern {
            TierPattern::Contains(needle) => format!("position({normalized}, '{needle}') > 0"),
            TierPattern::Equals(expected) => format!("{normalized} = '{expected}'"),
        };
        branches.push(format!("{condition}, '{}'", category.as_str()));
    }
    format!(
        "multiIf({}, '{}')",
        branches.join(", "),
        FALLBACK_CATEGORY.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_agrees_with_patterns() {
        for (tier, expected) in SERVICE_TIERS {
            assert_eq!(vehicle_category(tier), *expected, "tier {tier}");
        }
    }

    #[test]
    fn reverse_lookup_contains_every_tier() {
        for (tier, _) in SERVICE_TIERS {
            let tiers = service_tiers_for(vehicle_category(tier));
            assert!(tiers.contains(tier), "{tier} missing from {tiers:?}");
        }
    }

    #[test]
    fn every_category_is_listed_once() {
        let listed = category_tiers();
        assert_eq!(listed.len(), VehicleCategory::ALL.len());
        let total: usize = listed.iter().map(|entry| entry.service_tiers.len()).sum();
        assert_eq!(total, SERVICE_TIERS.len());
    }

    #[test]
    fn unknown_tiers_fall_back_to_cab() {
        for tier in ["", "Rickshaw XL", "Luxury", "allx", "Book Any Premium", "   "] {
            assert_eq!(vehicle_category(tier), VehicleCategory::Cab, "tier {tier:?}");
        }
    }

    #[test]
    fn matching_ignores_case_and_separators() {
        assert_eq!(vehicle_category("BIKE_TAXI"), VehicleCategory::Bike);
        assert_eq!(vehicle_category("ev-auto"), VehicleCategory::Auto);
        assert_eq!(vehicle_category("book_any"), VehicleCategory::BookAny);
        assert_eq!(vehicle_category("ALL"), VehicleCategory::All);
        assert_eq!(vehicle_category("ambulance_ventilator"), VehicleCategory::Others);
    }

    #[test]
    fn parses_category_names() {
        assert_eq!("bookany".parse::<VehicleCategory>(), Ok(VehicleCategory::BookAny));
        assert_eq!("Book Any".parse::<VehicleCategory>(), Ok(VehicleCategory::BookAny));
        assert_eq!("cab".parse::<VehicleCategory>(), Ok(VehicleCategory::Cab));
        assert!("truck".parse::<VehicleCategory>().is_err());
    }

    #[test]
    fn category_sql_follows_pattern_order() {
        let sql = category_sql("service_tier");
        let bike = sql.find("'Bike'").unwrap();
        let auto = sql.find("'Auto'").unwrap();
        let others = sql.find("'Others'").unwrap();
        assert!(bike < auto && auto < others);
        assert!(sql.ends_with(", 'Cab')"));
        assert!(sql.starts_with("multiIf("));
    }

    #[test]
    fn only_ascii_letters_are_folded() {
        // KELVIN SIGN lowercases to 'k' under Unicode rules but not under `lower()`.
        assert_eq!(vehicle_category("BI\u{212A}E"), VehicleCategory::Cab);
        assert_eq!(normalize_tier("Ä_Bike"), "Äbike");
        assert!(category_sql("service_tier").contains("lower(ifNull(service_tier, ''))"));
    }
}
