//! Conversions for the raw time fields carried in SI tables.
//!
//! DVB tables carry UTC as a 16-bit Modified Julian Date plus 24 bits of
//! BCD `hh:mm:ss`, and durations as BCD. ATSC tables count GPS seconds
//! since 1980-01-06 00:00:00 UTC.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

fn mjd_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1858, 11, 17)
}

fn gps_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1980, 1, 6)?.and_hms_opt(0, 0, 0)
}

/// Decode one BCD byte (`0x59` -> 59).
fn bcd_byte(value: u8) -> Option<u32> {
    let high = (value >> 4) as u32;
    let low = (value & 0x0F) as u32;
    if high > 9 || low > 9 {
        return None;
    }
    Some(high * 10 + low)
}

fn to_bcd(value: u32) -> u8 {
    (((value / 10) << 4) | (value % 10)) as u8
}

/// Split 24 bits of BCD `hh:mm:ss` into fields.
fn bcd_hms(value: u32) -> Option<(u32, u32, u32)> {
    let h = bcd_byte((value >> 16) as u8)?;
    let m = bcd_byte((value >> 8) as u8)?;
    let s = bcd_byte(value as u8)?;
    Some((h, m, s))
}

/// Decode a 40-bit MJD + BCD UTC time. The all-ones value means
/// "undefined" and yields `None`, as do invalid BCD digits.
pub fn mjd_utc_to_datetime(value: u64) -> Option<NaiveDateTime> {
    if value & 0xFF_FFFF_FFFF == 0xFF_FFFF_FFFF {
        return None;
    }

    let mjd = (value >> 24) as u16;
    let (h, m, s) = bcd_hms(value as u32 & 0xFF_FFFF)?;
    let date = mjd_epoch()?.checked_add_signed(Duration::days(mjd as i64))?;
    let time = NaiveTime::from_hms_opt(h, m, s)?;
    Some(date.and_time(time))
}

/// Encode a UTC time as 40-bit MJD + BCD. Dates outside the 16-bit MJD
/// range yield `None`.
pub fn datetime_to_mjd_utc(datetime: &NaiveDateTime) -> Option<u64> {
    let days = datetime.date().signed_duration_since(mjd_epoch()?).num_days();
    let mjd = u16::try_from(days).ok()?;
    let time = datetime.time();
    let bcd = ((to_bcd(time.hour()) as u64) << 16)
        | ((to_bcd(time.minute()) as u64) << 8)
        | to_bcd(time.second()) as u64;
    Some(((mjd as u64) << 24) | bcd)
}

/// Decode a 24-bit BCD `hh:mm:ss` duration.
pub fn bcd_duration(value: u32) -> Option<Duration> {
    let (h, m, s) = bcd_hms(value & 0xFF_FFFF)?;
    if m > 59 || s > 59 {
        return None;
    }
    Some(Duration::seconds((h * 3600 + m * 60 + s) as i64))
}

/// Encode a duration as 24-bit BCD. Durations of 100 hours or more, or
/// negative ones, yield `None`.
pub fn duration_to_bcd(duration: &Duration) -> Option<u32> {
    let total = u32::try_from(duration.num_seconds()).ok()?;
    let h = total / 3600;
    if h > 99 {
        return None;
    }
    let m = (total / 60) % 60;
    let s = total % 60;
    Some(((to_bcd(h) as u32) << 16) | ((to_bcd(m) as u32) << 8) | to_bcd(s) as u32)
}

/// Convert GPS seconds to UTC using the GPS-UTC offset broadcast with it.
pub fn gps_to_utc(gps_seconds: u32, gps_utc_offset: u8) -> Option<NaiveDateTime> {
    let seconds = gps_seconds as i64 - gps_utc_offset as i64;
    gps_epoch()?.checked_add_signed(Duration::seconds(seconds))
}
