//! Business-day and time-window arithmetic.
//! Every Monday–Friday is a business day; holidays are not modeled.

use chrono::{Datelike, Duration, NaiveTime, Weekday};
use rastro_core::types::Instant;

/// Whether the local date of `instant` is Monday–Friday.
pub fn is_business_day(instant: &Instant) -> bool {
    !matches!(instant.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Advance `start` by `n` business days, keeping the local time of day.
/// Starting on a weekend counts the following Monday as the first day.
/// `None` when the result falls outside the representable date range.
pub fn add_business_days(start: Instant, n: u32) -> Option<Instant> {
    if n == 0 {
        return Some(start);
    }
    // Any seven consecutive days hold exactly five business days. At least one day is
    // left to step so the result always lands on a business day.
    let weeks = (n - 1) / 5;
    let mut current = start.checked_add_signed(Duration::try_days(i64::from(weeks) * 7)?)?;
    let mut remaining = n - weeks * 5;
    while remaining > 0 {
        current = current.checked_add_signed(Duration::days(1))?;
        if is_business_day(&current) {
            remaining -= 1;
        }
    }
    Some(current)
}

/// Largest `k <= cap` such that `add_business_days(start, k) <= end`.
pub fn business_days_between(start: Instant, end: Instant, cap: u32) -> u32 {
    let mut elapsed = 0;
    let mut cursor = start;
    while elapsed < cap {
        match add_business_days(cursor, 1) {
            Some(next) if next <= end => {
                cursor = next;
                elapsed += 1;
            }
            _ => break,
        }
    }
    elapsed
}

/// Earliest instant at or after `instant` whose time of day lies in the window.
///
/// `window_start == window_end` is an all-day window. `window_start > window_end` wraps
/// past midnight (e.g. 22:00–06:00).
pub fn next_time_in_window(
    instant: Instant,
    window_start: NaiveTime,
    window_end: NaiveTime,
) -> Instant {
    if window_start == window_end {
        return instant;
    }

    let t = instant.time();
    let wraps = window_start > window_end;
    let inside = if wraps {
        t >= window_start || t <= window_end
    } else {
        t >= window_start && t <= window_end
    };
    if inside {
        return instant;
    }

    let today = instant.date_naive();
    // Past the end of a same-day window: the next opening is tomorrow.
    let opening_day = if !wraps && t > window_end {
        match today.succ_opt() {
            Some(d) => d,
            None => return instant,
        }
    } else {
        today
    };

    let target = opening_day.and_time(window_start);
    instant + (target - instant.naive_local())
}
