use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use common::{DropReason, RawSignal, ScheduledTrade};

use crate::config::SchedulerConfig;
use crate::timezone::TimezoneNormalizer;

/// Business rules between a raw signal and the executor.
///
/// Only near-term schedules are trusted: anything already elapsed or more
/// than `max_lead` ahead is dropped.
#[derive(Debug, Clone)]
pub struct SignalValidator {
    normalizer: TimezoneNormalizer,
    max_lead: Duration,
    default_source: String,
    default_timeframe: String,
}

impl SignalValidator {
    pub fn new(normalizer: TimezoneNormalizer, cfg: &SchedulerConfig) -> Self {
        Self {
            normalizer,
            max_lead: Duration::seconds(cfg.max_lead_secs),
            default_source: cfg.default_source.clone(),
            default_timeframe: cfg.default_timeframe.clone(),
        }
    }

    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self::new(TimezoneNormalizer::new(cfg.aliases.clone()), cfg)
    }

    pub fn validate(&self, raw: &RawSignal) -> Result<ScheduledTrade, DropReason> {
        self.validate_at(raw, Utc::now())
    }

    pub fn validate_at(
        &self,
        raw: &RawSignal,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTrade, DropReason> {
        let pair = raw
            .currency_pair
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(DropReason::MissingField("currency_pair"))?;
        let direction = raw.direction.ok_or(DropReason::MissingField("direction"))?;
        let entry_time = raw
            .entry_time
            .as_ref()
            .ok_or(DropReason::MissingField("entry_time"))?;

        let source = raw
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.default_source);

        let entry_instant = self
            .normalizer
            .resolve_instant_at(entry_time, source, now)
            .ok_or_else(|| DropReason::Unresolvable(entry_time.to_string()))?;

        let delta = entry_instant.with_timezone(&Utc) - now;
        // The entry must lie strictly in the future.
        if delta <= Duration::zero() {
            return Err(DropReason::Elapsed {
                delta_secs: -delta.num_seconds(),
            });
        }
        if delta > self.max_lead {
            return Err(DropReason::TooFarAhead {
                delta_secs: delta.num_seconds(),
                max_secs: self.max_lead.num_seconds(),
            });
        }

        let mut martingale_instants = Vec::with_capacity(raw.martingale_times.len());
        for time in &raw.martingale_times {
            match self.normalizer.normalize_at(time, source, now) {
                Some(instant) if instant > entry_instant => martingale_instants.push(instant),
                Some(instant) => {
                    warn!(pair = %pair, time = %time, instant = %instant, "Martingale time not after entry, skipping leg");
                }
                None => {
                    warn!(pair = %pair, time = %time, "Martingale time unresolvable, skipping leg");
                }
            }
        }
        martingale_instants.sort();

        let timeframe = raw
            .timeframe
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.default_timeframe)
            .to_string();

        let trade = ScheduledTrade {
            currency_pair: pair.to_string(),
            direction,
            entry_instant,
            timeframe,
            martingale_instants,
            raw_source: source.to_string(),
        };
        info!(
            pair = %trade.currency_pair,
            direction = %trade.direction,
            entry = %trade.entry_instant,
            lead_secs = delta.num_seconds(),
            legs = trade.martingale_instants.len() + 1,
            "Signal accepted"
        );
        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{Direction, SignalTime};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn validator() -> SignalValidator {
        SignalValidator::from_config(&SchedulerConfig::default())
    }

    fn at(offset: Duration) -> SignalTime {
        SignalTime::Instant((now() + offset).fixed_offset())
    }

    fn raw(entry: SignalTime, source: &str) -> RawSignal {
        RawSignal {
            currency_pair: Some("EUR/USD".into()),
            direction: Some(Direction::Buy),
            entry_time: Some(entry),
            timeframe: Some("M1".into()),
            martingale_times: Vec::new(),
            source: Some(source.into()),
        }
    }

    #[test]
    fn lead_boundary_is_600_seconds() {
        let v = validator();
        assert!(v.validate_at(&raw(at(Duration::seconds(599)), "UTC"), now()).is_ok());
        assert!(v.validate_at(&raw(at(Duration::seconds(600)), "UTC"), now()).is_ok());
        assert!(matches!(
            v.validate_at(&raw(at(Duration::seconds(601)), "UTC"), now()),
            Err(DropReason::TooFarAhead { delta_secs: 601, max_secs: 600 })
        ));
    }

    #[test]
    fn past_entry_is_dropped() {
        let v = validator();
        let result = v.validate_at(&raw(at(Duration::seconds(-60)), "UTC"), now());
        assert_eq!(result, Err(DropReason::Elapsed { delta_secs: 60 }));
    }

    #[test]
    fn entry_at_now_is_dropped() {
        let v = validator();
        let result = v.validate_at(&raw(at(Duration::zero()), "UTC"), now());
        assert_eq!(result, Err(DropReason::Elapsed { delta_secs: 0 }));
        assert!(v.validate_at(&raw(at(Duration::seconds(1)), "UTC"), now()).is_ok());
    }

    #[test]
    fn otc_clock_signals_follow_the_lead_window() {
        let v = validator();
        // 12:00 UTC is 09:00 in UTC-3.
        let accepted = v
            .validate_at(&raw(SignalTime::clock("09:09"), "OTC-3"), now())
            .unwrap();
        assert_eq!(accepted.entry_instant.with_timezone(&Utc), now() + Duration::minutes(9));
        assert_eq!(accepted.entry_instant.offset().local_minus_utc(), -3 * 3600);
        assert_eq!(accepted.raw_source, "OTC-3");

        assert!(matches!(
            v.validate_at(&raw(SignalTime::clock("09:11"), "OTC-3"), now()),
            Err(DropReason::TooFarAhead { .. })
        ));
        assert!(matches!(
            v.validate_at(&raw(SignalTime::clock("08:59"), "OTC-3"), now()),
            Err(DropReason::Elapsed { .. })
        ));
    }

    #[test]
    fn missing_fields_are_named() {
        let v = validator();
        let mut signal = raw(at(Duration::minutes(1)), "UTC");
        signal.currency_pair = Some("  ".into());
        assert_eq!(
            v.validate_at(&signal, now()),
            Err(DropReason::MissingField("currency_pair"))
        );

        let mut signal = raw(at(Duration::minutes(1)), "UTC");
        signal.direction = None;
        assert_eq!(v.validate_at(&signal, now()), Err(DropReason::MissingField("direction")));

        let mut signal = raw(at(Duration::minutes(1)), "UTC");
        signal.entry_time = None;
        assert_eq!(v.validate_at(&signal, now()), Err(DropReason::MissingField("entry_time")));
    }

    #[test]
    fn martingale_legs_are_filtered_and_sorted() {
        let v = validator();
        let mut signal = raw(at(Duration::minutes(2)), "UTC");
        signal.martingale_times = vec![
            at(Duration::minutes(4)),
            at(Duration::minutes(3)),
            at(Duration::minutes(1)), // before entry
            at(Duration::minutes(-1)), // elapsed
            SignalTime::clock("nonsense"),
        ];
        let trade = v.validate_at(&signal, now()).unwrap();
        let legs: Vec<_> = trade
            .martingale_instants
            .iter()
            .map(|i| i.with_timezone(&Utc))
            .collect();
        assert_eq!(legs, vec![now() + Duration::minutes(3), now() + Duration::minutes(4)]);
    }

    #[test]
    fn defaults_fill_source_and_timeframe() {
        let v = validator();
        let mut signal = raw(SignalTime::clock("09:05"), "OTC-3");
        signal.source = None;
        signal.timeframe = None;
        let trade = v.validate_at(&signal, now()).unwrap();
        assert_eq!(trade.raw_source, "OTC-3");
        assert_eq!(trade.timeframe, "M1");
    }
}
