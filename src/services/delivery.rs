//! Minimum delivery-window policy.
//!
//! Every offer must declare a window long enough to physically transfer its
//! full quantity at an assumed fixed power rating. The same formula bounds
//! the minimum acceptable overlap between two offers during matching.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Assumed transfer rating: 7 kW.
pub const ASSUMED_POWER_KW: Decimal = Decimal::from_parts(7, 0, 0, false, 0);
/// Safety margin added on top of the raw transfer time.
pub const DELIVERY_BUFFER_MINUTES: i64 = 10;
/// Scheduling granularity; required minutes round up to this step.
pub const TIME_STEP_MINUTES: i64 = 5;
/// Hard floor, regardless of quantity.
pub const MIN_OVERLAP_MINUTES: i64 = 10;

/// Minutes needed to deliver `quantity_kwh` at the assumed rating:
/// `ceil(q / 7kW * 60) + buffer`, rounded up to the scheduling step,
/// floored at the global minimum.
pub fn required_overlap_minutes(quantity_kwh: Decimal) -> i64 {
    if quantity_kwh <= Decimal::ZERO {
        return MIN_OVERLAP_MINUTES;
    }

    let raw = (quantity_kwh * Decimal::from(60) / ASSUMED_POWER_KW)
        .ceil()
        .to_i64()
        .unwrap_or(i64::MAX - DELIVERY_BUFFER_MINUTES - TIME_STEP_MINUTES);

    let mut total = raw + DELIVERY_BUFFER_MINUTES;

    let rem = total % TIME_STEP_MINUTES;
    if rem != 0 {
        total += TIME_STEP_MINUTES - rem;
    }

    total.max(MIN_OVERLAP_MINUTES)
}

/// Earliest acceptable `end_time` for an offer starting at `start_time`.
pub fn min_end_time(start_time: DateTime<Utc>, quantity_kwh: Decimal) -> DateTime<Utc> {
    start_time + Duration::minutes(required_overlap_minutes(quantity_kwh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn seven_kwh_needs_seventy_minutes() {
        // 7.0 kWh at 7 kW is exactly one hour, plus the 10 minute buffer.
        assert_eq!(required_overlap_minutes(dec("7.0")), 70);
    }

    #[test]
    fn rounds_up_to_scheduling_step() {
        // 5.0 kWh -> ceil(42.86) = 43 + 10 = 53 -> next step is 55.
        assert_eq!(required_overlap_minutes(dec("5.000")), 55);
        // 3.5 kWh -> 30 + 10 = 40, already on a step boundary.
        assert_eq!(required_overlap_minutes(dec("3.500")), 40);
    }

    #[test]
    fn floors_at_global_minimum() {
        assert_eq!(required_overlap_minutes(Decimal::ZERO), MIN_OVERLAP_MINUTES);
        assert_eq!(required_overlap_minutes(dec("-1")), MIN_OVERLAP_MINUTES);
        // Tiny quantities still carry the buffer, so they land above the floor.
        assert!(required_overlap_minutes(dec("0.001")) >= MIN_OVERLAP_MINUTES);
    }

    #[test]
    fn min_end_time_adds_required_minutes() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let end = min_end_time(start, dec("7.0"));
        assert_eq!(end, start + Duration::minutes(70));
    }

    #[test]
    fn monotonic_in_quantity() {
        let mut prev = 0;
        for q in ["0.5", "1.0", "3.3", "7.0", "14.0", "21.0", "100.0"] {
            let m = required_overlap_minutes(dec(q));
            assert!(m >= prev, "required minutes decreased at {}", q);
            prev = m;
        }
    }
}
