//! Market Calendar (C2). Wall-clock session gating only — holiday lookups
//! are a named non-goal (§4.2), so this module answers "is the market in
//! its regular trading session right now" from weekday + local time alone.
//!
//! Hong Kong and mainland China share a single, DST-free UTC+8 offset, so
//! a fixed `FixedOffset` stands in for a full `chrono-tz` zone database.

use crate::domain::types::Market;
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};

fn shanghai_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("valid fixed offset")
}

fn eastern_offset() -> FixedOffset {
    // US regular session in the spec is expressed as a fixed local-time
    // window (21:30-04:00 UTC+8 next day), already Shanghai-relative; no
    // separate US-local clock is needed.
    shanghai_offset()
}

fn in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        t >= start && t <= end
    } else {
        // window wraps past midnight
        t >= start || t <= end
    }
}

fn is_weekday_session_day(weekday: Weekday, wraps_from_previous_day: bool) -> bool {
    // A session that starts in the evening and wraps past midnight is
    // still "open" during the small hours of the following calendar day,
    // so Saturday morning (the tail of Friday evening's US session) counts.
    if wraps_from_previous_day {
        !matches!(weekday, Weekday::Sun | Weekday::Mon)
    } else {
        !matches!(weekday, Weekday::Sat | Weekday::Sun)
    }
}

/// Hong Kong regular session: 09:30-12:00 and 13:00-16:00, Mon-Fri, Asia/Shanghai time.
pub fn hk_is_open(at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&shanghai_offset());
    if !is_weekday_session_day(local.weekday(), false) {
        return false;
    }
    let t = local.time();
    let morning = in_window(t, NaiveTime::from_hms_opt(9, 30, 0).unwrap(), NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    let afternoon = in_window(t, NaiveTime::from_hms_opt(13, 0, 0).unwrap(), NaiveTime::from_hms_opt(16, 0, 0).unwrap());
    morning || afternoon
}

/// US regular session expressed in Asia/Shanghai wall time: 21:30-04:00 (+1 day), Mon-Fri US calendar.
pub fn us_is_open(at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&eastern_offset());
    let t = local.time();
    let window_start = NaiveTime::from_hms_opt(21, 30, 0).unwrap();
    let window_end = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
    if !in_window(t, window_start, window_end) {
        return false;
    }
    let wraps = t <= window_end;
    is_weekday_session_day(local.weekday(), wraps)
}

/// Returns whether `market` is in its regular trading session at `at`.
pub fn is_open(market: Market, at: DateTime<Utc>) -> bool {
    match market {
        Market::Hk => hk_is_open(at),
        Market::Us => us_is_open(at),
    }
}
