use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use common::SignalTime;

use crate::config::default_aliases;

/// Largest UTC offset in use anywhere, in hours.
const MAX_OFFSET_HOURS: i32 = 14;

/// The zone a signal's wall-clock times are expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceZone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl SourceZone {
    pub fn utc() -> Self {
        SourceZone::Fixed(FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    /// Current offset from UTC at `at`, in seconds.
    pub fn offset_secs_at(&self, at: &DateTime<Utc>) -> i32 {
        self.express(&at.fixed_offset()).offset().local_minus_utc()
    }

    fn today(&self, now: &DateTime<Utc>) -> NaiveDate {
        match self {
            SourceZone::Fixed(offset) => now.with_timezone(offset).date_naive(),
            SourceZone::Named(tz) => now.with_timezone(tz).date_naive(),
        }
    }

    /// Attach this zone to a local wall-clock time. `None` for local times
    /// that do not exist (DST gaps).
    fn localize(&self, local: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            SourceZone::Fixed(offset) => offset.from_local_datetime(local).single(),
            SourceZone::Named(tz) => tz
                .from_local_datetime(local)
                .earliest()
                .map(|dt| dt.fixed_offset()),
        }
    }

    /// Re-express an instant in this zone.
    fn express(&self, instant: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self {
            SourceZone::Fixed(offset) => instant.with_timezone(offset),
            SourceZone::Named(tz) => instant.with_timezone(tz).fixed_offset(),
        }
    }
}

/// Turns a signal's time plus a free-text zone hint into an instant in the
/// source zone.
///
/// Zone hints are resolved in order: `UTC±H[:MM]`, `OTC-H` (always a
/// negative offset), a configured alias, an IANA name. Anything else falls
/// back to UTC with a warning. Normalization never fails loudly; elapsed or
/// unparseable times come back as `None`.
#[derive(Debug, Clone)]
pub struct TimezoneNormalizer {
    aliases: HashMap<String, i32>,
}

impl Default for TimezoneNormalizer {
    fn default() -> Self {
        Self::new(default_aliases())
    }
}

impl TimezoneNormalizer {
    pub fn new(aliases: HashMap<String, i32>) -> Self {
        // Alias lookup is case-insensitive.
        let aliases = aliases
            .into_iter()
            .map(|(name, hours)| (name.trim().to_lowercase(), hours))
            .collect();
        Self { aliases }
    }

    pub fn normalize(&self, time: &SignalTime, source_hint: &str) -> Option<DateTime<FixedOffset>> {
        self.normalize_at(time, source_hint, Utc::now())
    }

    /// Same as [`normalize`](Self::normalize) with an explicit "now".
    pub fn normalize_at(
        &self,
        time: &SignalTime,
        source_hint: &str,
        now: DateTime<Utc>,
    ) -> Option<DateTime<FixedOffset>> {
        let instant = self.resolve_instant_at(time, source_hint, now)?;
        if instant <= now {
            debug!(time = %time, instant = %instant, "Signal time already elapsed");
            return None;
        }
        Some(instant)
    }

    /// Resolves the instant without rejecting elapsed ones. `now` only picks
    /// the calendar day for bare clock times.
    pub fn resolve_instant_at(
        &self,
        time: &SignalTime,
        source_hint: &str,
        now: DateTime<Utc>,
    ) -> Option<DateTime<FixedOffset>> {
        let zone = self.resolve_zone(source_hint);

        let instant = match time {
            SignalTime::Instant(dt) => zone.express(dt),
            SignalTime::Clock(raw) => {
                let clock = match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
                    Ok(clock) => clock,
                    Err(e) => {
                        debug!(time = %raw, error = %e, "Unparseable signal time");
                        return None;
                    }
                };
                let local = zone.today(&now).and_time(clock);
                match zone.localize(&local) {
                    Some(instant) => instant,
                    None => {
                        debug!(time = %raw, zone = ?zone, "Signal time does not exist in source zone");
                        return None;
                    }
                }
            }
        };
        Some(instant)
    }

    pub fn resolve_zone(&self, hint: &str) -> SourceZone {
        let hint = hint.trim();

        if let Some(offset) = parse_prefixed_offset(hint, "UTC", true) {
            return SourceZone::Fixed(offset);
        }
        if let Some(offset) = parse_prefixed_offset(hint, "OTC", false) {
            return SourceZone::Fixed(offset);
        }
        if let Some(offset) = self
            .aliases
            .get(&hint.to_lowercase())
            .and_then(|hours| hours_offset(*hours, 0))
        {
            return SourceZone::Fixed(offset);
        }
        if let Ok(tz) = hint.parse::<Tz>() {
            return SourceZone::Named(tz);
        }

        warn!(hint = %hint, "Unrecognized timezone hint, falling back to UTC");
        SourceZone::utc()
    }
}

/// Parses `<prefix>±H[:MM]`. With `signed == false` only `-H` is accepted and
/// the offset is always negative.
fn parse_prefixed_offset(hint: &str, prefix: &str, signed: bool) -> Option<FixedOffset> {
    if hint.len() <= prefix.len() || !hint.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, rest) = hint.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = rest.trim_start();
    let (sign, digits) = match rest.chars().next()? {
        '+' if signed => (1, &rest[1..]),
        '-' => (-1, &rest[1..]),
        _ => return None,
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h.trim().parse::<i32>().ok()?, m.trim().parse::<i32>().ok()?),
        None => (digits.trim().parse::<i32>().ok()?, 0),
    };
    if !(0..60).contains(&minutes) {
        return None;
    }
    hours_offset(sign * hours, sign * minutes)
}

fn hours_offset(hours: i32, minutes: i32) -> Option<FixedOffset> {
    if hours.abs() > MAX_OFFSET_HOURS {
        return None;
    }
    FixedOffset::east_opt(hours * 3600 + minutes * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn offset_hours(zone: SourceZone) -> i32 {
        zone.offset_secs_at(&now()) / 3600
    }

    #[test]
    fn utc_pattern_resolves_both_signs() {
        let n = TimezoneNormalizer::default();
        assert_eq!(offset_hours(n.resolve_zone("UTC+1")), 1);
        assert_eq!(offset_hours(n.resolve_zone("UTC-4")), -4);
        assert_eq!(offset_hours(n.resolve_zone("utc+5")), 5);
        assert_eq!(n.resolve_zone("UTC+5:30").offset_secs_at(&now()), 5 * 3600 + 1800);
    }

    #[test]
    fn otc_and_utc_minus_three_agree() {
        let n = TimezoneNormalizer::default();
        assert_eq!(n.resolve_zone("OTC-3"), n.resolve_zone("UTC-3"));
        assert_eq!(offset_hours(n.resolve_zone("OTC-3")), -3);
    }

    #[test]
    fn otc_plus_is_not_a_fixed_offset() {
        let n = TimezoneNormalizer::default();
        // Not a recognized form, so it degrades to UTC.
        assert_eq!(n.resolve_zone("OTC+3"), SourceZone::utc());
    }

    #[test]
    fn alias_lookup_is_case_insensitive() {
        let n = TimezoneNormalizer::default();
        assert_eq!(offset_hours(n.resolve_zone("Cameroon")), 1);
        assert_eq!(offset_hours(n.resolve_zone("cameroon")), 1);
    }

    #[test]
    fn iana_name_resolves() {
        let n = TimezoneNormalizer::default();
        assert_eq!(
            n.resolve_zone("America/Sao_Paulo"),
            SourceZone::Named(chrono_tz::America::Sao_Paulo)
        );
    }

    #[test]
    fn unknown_hint_falls_back_to_utc() {
        let n = TimezoneNormalizer::default();
        assert_eq!(n.resolve_zone("Atlantis"), SourceZone::utc());
        assert_eq!(n.resolve_zone(""), SourceZone::utc());
        assert_eq!(n.resolve_zone("UTC+99"), SourceZone::utc());
    }

    #[test]
    fn clock_time_is_today_in_source_zone() {
        let n = TimezoneNormalizer::default();
        // 12:00 UTC is 09:00 in UTC-3.
        let instant = n
            .normalize_at(&SignalTime::clock("09:30"), "OTC-3", now())
            .expect("future time");
        assert_eq!(instant.offset().local_minus_utc(), -3 * 3600);
        assert_eq!((instant.hour(), instant.minute()), (9, 30));
        assert_eq!(instant.with_timezone(&Utc), now() + Duration::minutes(30));
    }

    #[test]
    fn elapsed_clock_time_is_none() {
        let n = TimezoneNormalizer::default();
        assert!(n.normalize_at(&SignalTime::clock("08:59"), "OTC-3", now()).is_none());
        // Entry exactly at now is not in the future either.
        assert!(n.normalize_at(&SignalTime::clock("09:00"), "OTC-3", now()).is_none());
    }

    #[test]
    fn tagged_instant_is_reexpressed_in_source_zone() {
        let n = TimezoneNormalizer::default();
        let tagged = (now() + Duration::minutes(5)).fixed_offset();
        let instant = n
            .normalize_at(&SignalTime::Instant(tagged), "Cameroon", now())
            .unwrap();
        assert_eq!(instant, tagged);
        assert_eq!(instant.offset().local_minus_utc(), 3600);
    }

    #[test]
    fn garbage_time_is_none() {
        let n = TimezoneNormalizer::default();
        assert!(n.normalize_at(&SignalTime::clock("25:99"), "UTC+1", now()).is_none());
        assert!(n.normalize_at(&SignalTime::clock("soon"), "UTC+1", now()).is_none());
    }
}
