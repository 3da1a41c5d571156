// Copyright (C) 2019  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Gregorian calendar arithmetic: seconds-since-epoch <-> calendar triple conversions, and
//! local/universal time conversion.
//!
//! Dates are handled back to year 0; because the Gregorian calendar was adopted at different
//! times in different areas, [`GREG_START`] is an arbitrary transition year, and [`EPOCH_DAYS`]
//! is the number of days from the start of this calendar to the Unix epoch.

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;

/// Arbitrary Gregorian calendar transition year used as the base for [`calc_epoch_day`].
pub const GREG_START: i64 = 1600;
/// Number of days between 1-Jan-`GREG_START` and the Unix epoch (1-Jan-1970).
pub const EPOCH_DAYS: i64 = 135140;
/// Earliest year guaranteed to be handled without trouble on every supported platform.
pub const YEAR_MIN: i64 = 1902;
/// Latest representable year.
pub const YEAR_MAX: i64 = i32::MAX as i64 - 1;

const MONTH_DAYS: [u8; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// A Gregorian calendar date and time, as used by the public calendar conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GregorianDateTime {
    pub year: i64,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Whether a given year is a leap year in the proleptic Gregorian calendar.
pub fn is_leap_year(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Number of days in `month` (1-based) of `year`.
pub fn days_in_month(year: i64, month: u8) -> u8 {
    if month == 2 {
        if is_leap_year(year) {
            29
        } else {
            28
        }
    } else {
        MONTH_DAYS[month as usize]
    }
}

fn is_valid_time(base_year: i64, dt: &GregorianDateTime) -> bool {
    (base_year..=YEAR_MAX).contains(&dt.year)
        && (1..=12).contains(&dt.month)
        && (1..=days_in_month(dt.year, dt.month)).contains(&dt.day)
        && dt.hour <= 23
        && dt.minute <= 59
        && dt.second <= 59
}

/// Number of days between the Unix epoch and `year-month-day`.
///
/// Internal use only: `year`, `month` and `day` are not validated here and must already have
/// passed [`is_valid_time`] (or an equivalent check) before calling this.
pub fn calc_epoch_day(year: i64, month: u8, day: u8) -> i64 {
    let gyear = year - GREG_START;
    let mut ndays: i64 = match gyear {
        0 => 0,
        1 => 366,
        _ => {
            let pyear = gyear - 1;
            pyear / 4 - pyear / 100 + pyear / 400 + pyear * 365 + 366
        }
    };
    for m in 1..month {
        ndays += i64::from(MONTH_DAYS[m as usize]);
    }
    if month > 2 && is_leap_year(year) {
        ndays += 1;
    }
    ndays += i64::from(day) - 1;
    ndays - EPOCH_DAYS
}

/// Converts seconds since the Unix epoch to a Gregorian calendar triple. Always succeeds: every
/// `i64` second count maps to some date in the proleptic Gregorian calendar.
pub fn seconds_to_univ(time: i64) -> GregorianDateTime {
    let mut days = time.div_euclid(SECONDS_PER_DAY);
    let mut secs = time.rem_euclid(SECONDS_PER_DAY);
    if secs < 0 {
        days -= 1;
        secs += SECONDS_PER_DAY;
    }

    let tmp = secs % SECONDS_PER_HOUR;
    let hour = secs / SECONDS_PER_HOUR;
    let minute = tmp / SECONDS_PER_MINUTE;
    let second = tmp % SECONDS_PER_MINUTE;

    // Howard Hinnant's civil-from-days algorithm, shifted so day 0 is 1-Mar-0000.
    days += 719468;
    let mut y = (10_000 * days + 14_780) / 3_652_425;
    let mut tmp2 = days - (365 * y + y / 4 - y / 100 + y / 400);
    if tmp2 < 0 {
        y -= 1;
        tmp2 = days - (365 * y + y / 4 - y / 100 + y / 400);
    }
    let mi = (100 * tmp2 + 52) / 3060;
    let month = (mi + 2) % 12 + 1;
    let year = y + (mi + 2) / 12;
    let day = tmp2 - (mi * 306 + 5) / 10 + 1;

    GregorianDateTime {
        year,
        month: month as u8,
        day: day as u8,
        hour: hour as u8,
        minute: minute as u8,
        second: second as u8,
    }
}

/// Converts a Gregorian calendar triple to seconds since the Unix epoch.
///
/// Returns `None` if `dt` is not a valid date on or after [`GREG_START`] — the "calendar out of
/// range" failure case.
pub fn univ_to_seconds(dt: GregorianDateTime) -> Option<i64> {
    if !is_valid_time(GREG_START, &dt) {
        return None;
    }
    let days = calc_epoch_day(dt.year, dt.month, dt.day);
    Some(
        days * SECONDS_PER_DAY
            + i64::from(dt.hour) * SECONDS_PER_HOUR
            + i64::from(dt.minute) * SECONDS_PER_MINUTE
            + i64::from(dt.second),
    )
}

fn to_time_date(dt: GregorianDateTime) -> Option<time::Date> {
    let month = time::Month::try_from(dt.month).ok()?;
    let year = i32::try_from(dt.year).ok()?;
    time::Date::from_calendar_date(year, month, dt.day).ok()
}

fn from_time_primitive(dt: time::PrimitiveDateTime) -> GregorianDateTime {
    let date = dt.date();
    GregorianDateTime {
        year: i64::from(date.year()),
        month: date.month() as u8,
        day: date.day(),
        hour: dt.hour(),
        minute: dt.minute(),
        second: dt.second(),
    }
}

/// Converts a local-time Gregorian triple to a universal (UTC) one.
///
/// Mirrors `erl_mktime`'s retry policy: if the local offset cannot be determined for the given
/// instant, one retry is attempted at `second - 1` before reporting failure. Returns `None` if
/// `dt` is not a valid date on or after [`YEAR_MIN`], or if the offset remains indeterminate
/// after the retry.
pub fn local_to_univ(dt: GregorianDateTime) -> Option<GregorianDateTime> {
    if !is_valid_time(YEAR_MIN, &dt) {
        return None;
    }

    let attempt = |dt: GregorianDateTime| -> Option<GregorianDateTime> {
        let date = to_time_date(dt)?;
        let naive_time =
            time::Time::from_hms(dt.hour, dt.minute, dt.second).ok()?;
        let naive = time::PrimitiveDateTime::new(date, naive_time);
        let offset = time::UtcOffset::local_offset_at(naive.assume_utc()).ok()?;
        let utc = naive.assume_offset(offset).to_offset(time::UtcOffset::UTC);
        Some(from_time_primitive(time::PrimitiveDateTime::new(
            utc.date(),
            utc.time(),
        )))
    };

    if let Some(result) = attempt(dt) {
        return Some(result);
    }

    log::trace!("local_to_univ: offset lookup failed, retrying at second - 1");
    let mut retry = dt;
    retry.second = retry.second.saturating_sub(1);
    attempt(retry)
}

/// Converts a universal (UTC) Gregorian triple to a local-time one.
///
/// Returns `None` if `dt` is not a valid date on or after [`YEAR_MIN`], or if the local offset
/// cannot be determined.
pub fn univ_to_local(dt: GregorianDateTime) -> Option<GregorianDateTime> {
    if !is_valid_time(YEAR_MIN, &dt) {
        return None;
    }
    let date = to_time_date(dt)?;
    let naive_time = time::Time::from_hms(dt.hour, dt.minute, dt.second).ok()?;
    let utc = time::PrimitiveDateTime::new(date, naive_time).assume_utc();
    let offset = time::UtcOffset::local_offset_at(utc).ok()?;
    let local = utc.to_offset(offset);
    Some(from_time_primitive(time::PrimitiveDateTime::new(
        local.date(),
        local.time(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_1970() {
        let dt = seconds_to_univ(0);
        assert_eq!(
            dt,
            GregorianDateTime {
                year: 1970,
                month: 1,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0,
            }
        );
    }

    #[test]
    fn negative_seconds_roll_back_a_day() {
        let dt = seconds_to_univ(-1);
        assert_eq!(
            dt,
            GregorianDateTime {
                year: 1969,
                month: 12,
                day: 31,
                hour: 23,
                minute: 59,
                second: 59,
            }
        );
    }

    #[test]
    fn round_trip_over_a_wide_range() {
        // seconds_to_univ . univ_to_seconds == identity, swept across a few decades either
        // side of the epoch at an irregular stride.
        let mut t: i64 = -20 * 365 * 24 * 3600;
        while t < 60 * 365 * 24 * 3600 {
            let dt = seconds_to_univ(t);
            assert_eq!(univ_to_seconds(dt), Some(t), "round trip failed for t={t}");
            t += 86_399; // irregular stride so we don't only ever land on midnight
        }
    }

    #[test]
    fn leap_day_round_trips() {
        let dt = GregorianDateTime {
            year: 2024,
            month: 2,
            day: 29,
            hour: 12,
            minute: 0,
            second: 0,
        };
        let secs = univ_to_seconds(dt).unwrap();
        assert_eq!(seconds_to_univ(secs), dt);
    }

    #[test]
    fn rejects_year_before_greg_start() {
        let dt = GregorianDateTime {
            year: GREG_START - 1,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(univ_to_seconds(dt), None);
    }

    #[test]
    fn rejects_invalid_day_of_month() {
        let dt = GregorianDateTime {
            year: 2023,
            month: 2,
            day: 29, // 2023 is not a leap year
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(univ_to_seconds(dt), None);
    }

    #[test]
    fn local_to_univ_rejects_year_before_year_min() {
        let dt = GregorianDateTime {
            year: YEAR_MIN - 1,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(local_to_univ(dt), None);
    }
}
