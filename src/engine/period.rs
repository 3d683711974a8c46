use chrono::NaiveDate;

use crate::model::{DateWindow, PeriodSelector};

use super::EngineError;

/// Last calendar day of `month`: the day before the first of the following month.
fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year.checked_add(1)?, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

fn window(year: i32, first_month: u32, last_month: u32) -> Result<DateWindow, EngineError> {
    let start = NaiveDate::from_ymd_opt(year, first_month, 1)
        .ok_or(EngineError::InvalidPeriodSelector("year out of range"))?;
    let end = last_day_of_month(year, last_month)
        .ok_or(EngineError::InvalidPeriodSelector("year out of range"))?;
    Ok(DateWindow { start, end })
}

/// Resolve a period selector to its inclusive date window.
///
/// Year only covers the whole year; a month covers that calendar month; a
/// quarter covers its three months. A missing year is rejected rather than
/// widened, so a bulk purge can never run unbounded.
pub fn resolve_period(selector: &PeriodSelector) -> Result<DateWindow, EngineError> {
    let year = selector
        .year
        .ok_or(EngineError::InvalidPeriodSelector("year is required"))?;
    match (selector.month, selector.quarter) {
        (Some(_), Some(_)) => Err(EngineError::InvalidPeriodSelector(
            "specify either month or quarter, not both",
        )),
        (Some(month), None) => {
            if !(1..=12).contains(&month) {
                return Err(EngineError::InvalidPeriodSelector("month must be 1-12"));
            }
            window(year, month, month)
        }
        (None, Some(quarter)) => {
            if !(1..=4).contains(&quarter) {
                return Err(EngineError::InvalidPeriodSelector("quarter must be 1-4"));
            }
            let first = (quarter - 1) * 3 + 1;
            window(year, first, first + 2)
        }
        (None, None) => window(year, 1, 12),
    }
}
