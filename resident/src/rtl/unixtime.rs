//! DOS Date/Time Conversion
//!
//! DOS keeps file times as two packed 16-bit words:
//!
//! - time: `hhhhh mmmmmm sssss` (seconds stored in 2-second units)
//! - date: `yyyyyyy mmmm ddddd` (year relative to 1980)
//!
//! The host side uses signed nanoseconds since 1970-01-01 UTC. The timezone
//! offset is expressed in 2-second units and follows the "seconds west of
//! UTC" convention: `local = utc - tz_offset * 2s`.

/// Year the DOS date field counts from
pub const DOS_EPOCH_YEAR: i32 = 1980;

/// Largest year representable in the 7-bit year field
pub const DOS_MAX_YEAR: i32 = DOS_EPOCH_YEAR + 127;

const NS_PER_SEC: i64 = 1_000_000_000;

/// Two-second units in a day
const UNITS_PER_DAY: i64 = 43_200;

const DAYS_IN_MONTH: [i32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Packed DOS time and date words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    pub const fn new(date: u16, time: u16) -> Self {
        Self { time, date }
    }

    /// Pack broken-down fields. Fields are masked, not validated.
    pub fn from_fields(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let year = (year - DOS_EPOCH_YEAR).clamp(0, 127) as u16;
        Self {
            date: (year << 9) | (((month & 0xF) as u16) << 5) | (day & 0x1F) as u16,
            time: (((hour & 0x1F) as u16) << 11) | (((minute & 0x3F) as u16) << 5) | ((second / 2) & 0x1F) as u16,
        }
    }

    pub fn year(&self) -> i32 {
        DOS_EPOCH_YEAR + (self.date >> 9) as i32
    }

    pub fn month(&self) -> u32 {
        ((self.date >> 5) & 0xF) as u32
    }

    pub fn day(&self) -> u32 {
        (self.date & 0x1F) as u32
    }

    pub fn hour(&self) -> u32 {
        (self.time >> 11) as u32
    }

    pub fn minute(&self) -> u32 {
        ((self.time >> 5) & 0x3F) as u32
    }

    pub fn second(&self) -> u32 {
        ((self.time & 0x1F) * 2) as u32
    }
}

/// Check if a year is a leap year
#[inline]
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

#[inline]
fn days_in_year(year: i32) -> i64 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

#[inline]
fn days_in_month(year: i32, month: usize) -> i64 {
    if month == 1 && is_leap_year(year) {
        29
    } else {
        DAYS_IN_MONTH[month] as i64
    }
}

/// Convert host nanoseconds to DOS packed date/time.
///
/// Years before 1980 clamp the year field to 0 and years after 2107 clamp it
/// to 127; the remaining fields are kept.
pub fn timestamp_to_dos(ns: i64, tz_offset: i32) -> DosDateTime {
    let units = ns.div_euclid(NS_PER_SEC).div_euclid(2) - tz_offset as i64;

    let mut days = units.div_euclid(UNITS_PER_DAY);
    let in_day = units.rem_euclid(UNITS_PER_DAY);

    let mut year = 1970;
    while days < 0 {
        year -= 1;
        days += days_in_year(year);
    }
    while days >= days_in_year(year) {
        days -= days_in_year(year);
        year += 1;
    }

    let mut month = 0usize;
    while days >= days_in_month(year, month) {
        days -= days_in_month(year, month);
        month += 1;
    }

    let year_field = (year - DOS_EPOCH_YEAR).clamp(0, 127) as u16;
    let date = (year_field << 9) | (((month + 1) as u16) << 5) | (days as u16 + 1);

    let hours = in_day / 1800;
    let minutes = (in_day % 1800) / 30;
    let seconds2 = in_day % 30;
    let time = ((hours as u16) << 11) | ((minutes as u16) << 5) | seconds2 as u16;

    DosDateTime { time, date }
}

/// Convert DOS packed date/time to host nanoseconds.
///
/// A zero month or day is read as 1, so an all-zero date maps to 1980-01-01.
pub fn dos_to_timestamp(stamp: DosDateTime, tz_offset: i32) -> i64 {
    let year = stamp.year();
    let month = stamp.month().clamp(1, 12) as usize - 1;
    let day = stamp.day().max(1) as i64;

    let mut days: i64 = 0;
    for y in 1970..year {
        days += days_in_year(y);
    }
    for m in 0..month {
        days += days_in_month(year, m);
    }
    days += day - 1;

    let in_day = stamp.hour() as i64 * 1800 + stamp.minute() as i64 * 30 + (stamp.time & 0x1F) as i64;
    let units = days * UNITS_PER_DAY + in_day + tz_offset as i64;

    units * 2 * NS_PER_SEC
}
