//! GPS epoch time.
//!
//! LoRaWAN expresses absolute time as seconds since the GPS epoch
//! (1980-01-06T00:00:00Z). GPS time does not observe leap seconds, so it runs
//! ahead of UTC by the number of leap seconds inserted since the epoch.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Last UTC second (`YYYY, MM, DD` at 23:59:59) before each inserted leap
/// second.
const LEAP_SECONDS: [(i32, u32, u32); 18] = [
    (1981, 6, 30),
    (1982, 6, 30),
    (1983, 6, 30),
    (1985, 6, 30),
    (1987, 12, 31),
    (1989, 12, 31),
    (1990, 12, 31),
    (1992, 6, 30),
    (1993, 6, 30),
    (1994, 6, 30),
    (1995, 12, 31),
    (1997, 6, 30),
    (1998, 12, 31),
    (2005, 12, 31),
    (2008, 12, 31),
    (2012, 6, 30),
    (2015, 6, 30),
    (2016, 12, 31),
];

fn gps_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn leap_instants() -> impl Iterator<Item = DateTime<Utc>> {
    LEAP_SECONDS.iter().filter_map(|&(y, m, d)| {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(23, 59, 59))
            .map(|naive| naive.and_utc())
    })
}

/// Leap seconds inserted before `t`.
pub fn leap_seconds_before(t: DateTime<Utc>) -> u32 {
    leap_instants().filter(|leap| t > *leap).count() as u32
}

/// Time elapsed since the GPS epoch, in GPS seconds. Instants before the
/// epoch clamp to zero.
pub fn time_since_gps_epoch(t: DateTime<Utc>) -> Duration {
    let utc = (t - gps_epoch()).to_std().unwrap_or(Duration::ZERO);
    utc + Duration::from_secs(leap_seconds_before(t) as u64)
}

/// GPS seconds modulo 2^32, the form carried in application-layer commands.
pub fn gps_seconds_u32(t: DateTime<Utc>) -> u32 {
    (time_since_gps_epoch(t).as_secs() % (1u64 << 32)) as u32
}

/// Inverse of [`time_since_gps_epoch`].
pub fn from_time_since_gps_epoch(d: Duration) -> DateTime<Utc> {
    let mut t = gps_epoch() + chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero());
    for leap in leap_instants() {
        if t > leap {
            t -= chrono::Duration::seconds(1);
        }
    }
    t
}
