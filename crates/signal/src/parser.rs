use tracing::debug;

use common::{Direction, RawSignal, SignalTime};

const BUY_MARKERS: [&str; 4] = ["BUY", "CALL", "🟩", "🔼"];
const SELL_MARKERS: [&str; 4] = ["SELL", "PUT", "🟥", "🔽"];
const ENTRY_LABELS: [&str; 4] = ["entry time:", "entry at", "entry:", "time (utc"];
const MARTINGALE_LABELS: [&str; 2] = ["level", "protection"];

/// Parses a channel message into a raw signal.
///
/// Understands the Anna, OTC and Precision post layouts. Returns `None` for
/// chatter and for posts without a pair, a direction, or an entry time.
/// Times are returned as bare `HH:MM` clocks; zone handling happens later.
pub fn parse_signal(text: &str) -> Option<RawSignal> {
    let upper = text.to_uppercase();
    let is_anna = upper.contains("ANNA SIGNALS");

    let looks_like_signal = BUY_MARKERS
        .iter()
        .chain(SELL_MARKERS.iter())
        .any(|m| upper.contains(m))
        || is_anna
        || upper.contains("_OTC");
    if !looks_like_signal {
        return None;
    }

    let currency_pair = find_pair(&upper);
    let direction = find_direction(&upper);
    let source = if text.contains("💥 GET THIS SIGNAL HERE!") {
        "UTC-4"
    } else if text.contains("💥 TRADE WITH DESMOND!") {
        "Cameroon"
    } else {
        "OTC-3"
    };

    let mut entry_time = None;
    let mut timeframe = None;
    let mut martingale_times = Vec::new();

    for line in text.lines() {
        let lower = line.to_lowercase();

        if entry_time.is_none() {
            if let Some(pos) = ENTRY_LABELS.iter().filter_map(|l| lower.find(l)).min() {
                entry_time = find_clock(&lower[pos..]);
                if entry_time.is_some() {
                    continue;
                }
            }
        }

        if timeframe.is_none() {
            if let Some(pos) = lower.find("expiration") {
                timeframe = parse_expiration(&lower[pos + "expiration".len()..]);
            }
        }

        if MARTINGALE_LABELS.iter().any(|l| lower.contains(l)) {
            if let Some(clock) = find_clock(line) {
                martingale_times.push(clock);
            }
        }
    }

    let (Some(currency_pair), Some(direction), Some(entry_time)) =
        (currency_pair, direction, entry_time)
    else {
        debug!("Message looked like a signal but lacked pair, direction or entry time");
        return None;
    };

    if is_anna && martingale_times.is_empty() {
        martingale_times = [1, 2]
            .iter()
            .filter_map(|m| add_minutes(&entry_time, *m))
            .collect();
    }

    let timeframe = timeframe.unwrap_or(if is_anna { "M1" } else { "M5" });

    Some(RawSignal {
        currency_pair: Some(currency_pair),
        direction: Some(direction),
        entry_time: Some(SignalTime::Clock(entry_time)),
        timeframe: Some(timeframe.to_string()),
        martingale_times: martingale_times.into_iter().map(SignalTime::Clock).collect(),
        source: Some(source.to_string()),
    })
}

/// First `AAA/BBB` in the (uppercased) text.
fn find_pair(upper: &str) -> Option<String> {
    let chars: Vec<char> = upper.chars().collect();
    chars.windows(7).find_map(|w| {
        let letters = |s: &[char]| s.iter().all(|c| c.is_ascii_uppercase());
        (letters(&w[..3]) && w[3] == '/' && letters(&w[4..])).then(|| w.iter().collect())
    })
}

/// Earliest direction marker wins.
fn find_direction(upper: &str) -> Option<Direction> {
    let first = |markers: &[&str]| markers.iter().filter_map(|m| upper.find(m)).min();
    match (first(&BUY_MARKERS), first(&SELL_MARKERS)) {
        (Some(b), Some(s)) => Some(if b < s { Direction::Buy } else { Direction::Sell }),
        (Some(_), None) => Some(Direction::Buy),
        (None, Some(_)) => Some(Direction::Sell),
        (None, None) => None,
    }
}

/// First `HH:MM` (two digits each side) in `text`.
fn find_clock(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    (0..bytes.len().saturating_sub(4)).find_map(|i| {
        let w = &bytes[i..i + 5];
        let boundary_before = i == 0 || !bytes[i - 1].is_ascii_digit();
        let boundary_after = bytes.get(i + 5).map_or(true, |b| !b.is_ascii_digit());
        let shape = w[0].is_ascii_digit()
            && w[1].is_ascii_digit()
            && w[2] == b':'
            && w[3].is_ascii_digit()
            && w[4].is_ascii_digit();
        (shape && boundary_before && boundary_after)
            .then(|| String::from_utf8_lossy(w).into_owned())
    })
}

fn parse_expiration(rest: &str) -> Option<&'static str> {
    const KNOWN: [&str; 7] = ["1 minute", "5 minute", "5-minute", "m1", "m5", "1m", "5m"];
    let rest = rest.trim_start_matches([':', ' ']);
    let matched = KNOWN.iter().find(|k| rest.starts_with(*k))?;
    Some(if matched.contains('1') { "M1" } else { "M5" })
}

/// `HH:MM` plus `minutes`, wrapping at midnight.
fn add_minutes(clock: &str, minutes: u32) -> Option<String> {
    let (h, m) = clock.split_once(':')?;
    let total = (h.parse::<u32>().ok()? * 60 + m.parse::<u32>().ok()? + minutes) % (24 * 60);
    Some(format!("{:02}:{:02}", total / 60, total % 60))
}
