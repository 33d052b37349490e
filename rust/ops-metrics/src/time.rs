//! Period parsing for comparison reports.

use crate::{
    error::{Result, ServiceError},
    filters::Filters,
    models::Period,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};

const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// A parsed period boundary. Naive inputs keep no offset and are compared as
/// if they shared one; `%.f` renders fractional seconds only when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    value: DateTime<FixedOffset>,
    has_offset: bool,
}

impl Timestamp {
    pub fn render(&self) -> String {
        if self.has_offset {
            self.value.format(OFFSET_FORMAT).to_string()
        } else {
            self.value.naive_local().format(NAIVE_FORMAT).to_string()
        }
    }

    fn shifted(&self, delta: Duration) -> Self {
        Self {
            value: self.value + delta,
            has_offset: self.has_offset,
        }
    }
}

pub fn parse_timestamp(raw: &str) -> Result<Timestamp> {
    let value = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Timestamp {
            value: dt,
            has_offset: true,
        });
    }

    let naive = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        });

    match naive {
        Some(naive) => Ok(Timestamp {
            value: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).fixed_offset(),
            has_offset: false,
        }),
        None => Err(ServiceError::InvalidRequest(format!(
            "invalid timestamp '{raw}'"
        ))),
    }
}

/// Current and previous periods for a comparison.
///
/// Both periods carry the caller's strings unchanged, so the current period
/// binds exactly what an executive totals request with the same filters
/// binds. Without an explicit previous period, the window of equal length
/// ending one second before the current start is derived and rendered in the
/// start boundary's own notation.
pub fn comparison_periods(filters: &Filters, previous: Option<Period>) -> Result<(Period, Period)> {
    let (Some(from), Some(to)) = (
        non_blank(filters.date_from.as_deref()),
        non_blank(filters.date_to.as_deref()),
    ) else {
        return Err(ServiceError::InvalidRequest(
            "comparison requires dateFrom and dateTo".into(),
        ));
    };

    let start = parse_timestamp(from)?;
    let end = parse_timestamp(to)?;
    ensure_ordered(&start, &end)?;

    let current = Period {
        date_from: from.to_string(),
        date_to: to.to_string(),
    };

    let previous = match previous {
        Some(period) => {
            let prev_start = parse_timestamp(&period.date_from)?;
            let prev_end = parse_timestamp(&period.date_to)?;
            ensure_ordered(&prev_start, &prev_end)?;
            Period {
                date_from: period.date_from.trim().to_string(),
                date_to: period.date_to.trim().to_string(),
            }
        }
        None => {
            let prev_end = start.shifted(-Duration::seconds(1));
            let prev_start = prev_end.shifted(-(end.value - start.value));
            Period {
                date_from: prev_start.render(),
                date_to: prev_end.render(),
            }
        }
    };

    Ok((current, previous))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn ensure_ordered(start: &Timestamp, end: &Timestamp) -> Result<()> {
    if start.value > end.value {
        return Err(ServiceError::InvalidRequest(
            "period start must not be after its end".to_string(),
        ));
    }
    Ok(())
}
