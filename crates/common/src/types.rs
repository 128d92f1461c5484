use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Trade direction on the binary-options platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// A time as delivered by the signal source: either a bare wall-clock
/// `HH:MM` in the source zone, or an instant that already carries an offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalTime {
    Instant(DateTime<FixedOffset>),
    Clock(String),
}

impl SignalTime {
    pub fn clock(hhmm: impl Into<String>) -> Self {
        SignalTime::Clock(hhmm.into())
    }
}

impl std::fmt::Display for SignalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalTime::Instant(dt) => write!(f, "{}", dt.to_rfc3339()),
            SignalTime::Clock(s) => write!(f, "{s}"),
        }
    }
}

/// Signal as handed over by the transport layer.
///
/// Fields are optional because upstream parsing is loosely typed; the
/// validator decides which absences are fatal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub currency_pair: Option<String>,
    pub direction: Option<Direction>,
    pub entry_time: Option<SignalTime>,
    pub timeframe: Option<String>,
    #[serde(default)]
    pub martingale_times: Vec<SignalTime>,
    /// Free-text timezone hint, e.g. "OTC-3", "UTC+1", "Cameroon".
    pub source: Option<String>,
}

/// A validated signal, ready to be executed.
///
/// `entry_instant` lies in the future and within the lead horizon at
/// validation time. `martingale_instants` are strictly after the entry and
/// sorted ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTrade {
    pub currency_pair: String,
    pub direction: Direction,
    pub entry_instant: DateTime<FixedOffset>,
    pub timeframe: String,
    pub martingale_instants: Vec<DateTime<FixedOffset>>,
    pub raw_source: String,
}

impl ScheduledTrade {
    /// All leg instants, entry first. Index equals martingale level.
    pub fn legs(&self) -> impl Iterator<Item = DateTime<FixedOffset>> + '_ {
        std::iter::once(self.entry_instant).chain(self.martingale_instants.iter().copied())
    }
}

/// Outcome the classifier can see on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
        }
    }
}

/// Terminal result recorded on a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeResult {
    Win,
    Loss,
    NoResult,
}

impl From<Outcome> for TradeResult {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Win => TradeResult::Win,
            Outcome::Loss => TradeResult::Loss,
        }
    }
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeResult::Win => write!(f, "WIN"),
            TradeResult::Loss => write!(f, "LOSS"),
            TradeResult::NoResult => write!(f, "NO_RESULT"),
        }
    }
}

/// Lifecycle of a ledger entry. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Created,
    Placed,
    Resolved(TradeResult),
}

/// Fields needed to open a ledger entry.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub currency_pair: String,
    pub direction: Direction,
    pub timeframe: String,
    /// Identifier shared by all legs scheduled from the same signal.
    pub chain_id: String,
    pub martingale_level: u32,
    pub amount: f64,
}

/// A trade the registry is waiting on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTrade {
    pub trade_id: String,
    pub currency_pair: String,
    pub direction: Direction,
    pub timeframe: String,
    pub chain_id: String,
    pub martingale_level: u32,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when the driver confirms placement.
    pub placed_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub result: Option<TradeResult>,
}

impl PendingTrade {
    pub fn open(new: NewTrade) -> Self {
        Self {
            trade_id: uuid::Uuid::new_v4().to_string(),
            currency_pair: new.currency_pair,
            direction: new.direction,
            timeframe: new.timeframe,
            chain_id: new.chain_id,
            martingale_level: new.martingale_level,
            amount: new.amount,
            created_at: Utc::now(),
            placed_at: None,
            resolved: false,
            result: None,
        }
    }

    pub fn state(&self) -> TradeState {
        match (self.resolved, self.result, self.placed_at) {
            (true, Some(result), _) => TradeState::Resolved(result),
            (_, _, Some(_)) => TradeState::Placed,
            _ => TradeState::Created,
        }
    }
}

/// Why a signal was dropped instead of scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("entry time '{0}' could not be resolved or has already passed")]
    Unresolvable(String),
    #[error("entry time already passed ({delta_secs}s ago)")]
    Elapsed { delta_secs: i64 },
    #[error("entry time too far ahead ({delta_secs}s > {max_secs}s)")]
    TooFarAhead { delta_secs: i64, max_secs: i64 },
    #[error("engine is not running")]
    EngineNotRunning,
}

/// Whether trades go to the real platform or a simulated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// How the background sweep maps a detected marker onto pending trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    /// Resolve the latest placed trade of every outstanding pair.
    #[default]
    All,
    /// Resolve only when exactly one pair is outstanding.
    Strict,
}

/// Current state of the trading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop,
}

/// Structured events emitted by the engine. The binary decides where they go.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    Scheduled {
        trade: ScheduledTrade,
    },
    Dropped {
        pair: Option<String>,
        reason: DropReason,
    },
    GateFailed {
        pair: String,
        timeframe: String,
        level: u32,
    },
    Placed {
        trade: PendingTrade,
    },
    PlacementFailed {
        pair: String,
        level: u32,
        error: String,
    },
    /// A leg missed its entry instant by more than the tolerance.
    Expired {
        pair: String,
        level: u32,
        late_ms: i64,
    },
    Resolved {
        trade: PendingTrade,
    },
    MartingaleStopped {
        pair: String,
        chain_id: String,
        skipped_level: u32,
    },
}
