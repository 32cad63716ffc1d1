//! Billing period arithmetic

use chrono::{DateTime, Days, Months, Utc};
use tariff_types::{BillingCycle, DurationUnit, ValidationError};

/// End of a billing period starting at `start`.
///
/// Returns `Ok(None)` for perpetual cycles. Month and year additions clamp to
/// the last day of the target month (Jan 31 + 1 month is Feb 28, or Feb 29 in
/// a leap year) and keep the time of day.
pub fn next_period_end(
    start: DateTime<Utc>,
    unit: DurationUnit,
    value: Option<u32>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    unit.validate_value(value)?;
    let Some(n) = value else {
        return Ok(None);
    };

    let end = match unit {
        DurationUnit::Forever => return Ok(None),
        DurationUnit::Days => start.checked_add_days(Days::new(u64::from(n))),
        DurationUnit::Weeks => start.checked_add_days(Days::new(u64::from(n) * 7)),
        DurationUnit::Months => start.checked_add_months(Months::new(n)),
        DurationUnit::Years => n
            .checked_mul(12)
            .and_then(|months| start.checked_add_months(Months::new(months))),
    };

    end.map(Some).ok_or(ValidationError::DateOutOfRange)
}

/// [`next_period_end`] for a stored billing cycle
pub fn period_end_for(
    start: DateTime<Utc>,
    cycle: &BillingCycle,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    next_period_end(start, cycle.duration_unit(), cycle.duration_value())
}
