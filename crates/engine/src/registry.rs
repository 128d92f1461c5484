use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use common::{NewTrade, PendingTrade, TradeResult, TradeState};

/// The ledger of trades waiting for a result.
///
/// Every mutation and every snapshot goes through one mutex. The lock is
/// held only for the map operation itself, never across an await or a
/// detection call, so reads return owned copies.
#[derive(Debug, Default)]
pub struct TradeRegistry {
    trades: Mutex<HashMap<String, PendingTrade>>,
}

impl TradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a CREATED entry and returns its id.
    pub fn register(&self, new: NewTrade) -> String {
        let trade = PendingTrade::open(new);
        let id = trade.trade_id.clone();
        debug!(trade_id = %id, pair = %trade.currency_pair, level = trade.martingale_level, "Trade registered");
        self.trades.lock().insert(id.clone(), trade);
        id
    }

    /// CREATED → PLACED. `false` if the id is unknown or already placed.
    pub fn mark_placed(&self, trade_id: &str, at: DateTime<Utc>) -> bool {
        let mut trades = self.trades.lock();
        match trades.get_mut(trade_id) {
            Some(trade) if trade.state() == TradeState::Created => {
                trade.placed_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// PLACED → RESOLVED. Returns the resolved entry only for the call that
    /// made the transition; later calls, unknown ids and unplaced trades are
    /// no-ops returning `None`.
    pub fn resolve(&self, trade_id: &str, result: TradeResult) -> Option<PendingTrade> {
        let mut trades = self.trades.lock();
        let trade = trades.get_mut(trade_id)?;
        if trade.state() != TradeState::Placed {
            return None;
        }
        trade.resolved = true;
        trade.result = Some(result);
        Some(trade.clone())
    }

    /// Ids of unresolved trades on `pair`, as an owned snapshot.
    pub fn pending_for(&self, currency_pair: &str) -> HashSet<String> {
        self.trades
            .lock()
            .values()
            .filter(|t| !t.resolved && t.currency_pair == currency_pair)
            .map(|t| t.trade_id.clone())
            .collect()
    }

    /// Pairs with at least one placed, unresolved trade.
    pub fn outstanding_pairs(&self) -> HashSet<String> {
        self.trades
            .lock()
            .values()
            .filter(|t| t.state() == TradeState::Placed)
            .map(|t| t.currency_pair.clone())
            .collect()
    }

    /// The most recently placed unresolved trade on `pair`.
    pub fn latest_placed_for(&self, currency_pair: &str) -> Option<String> {
        self.trades
            .lock()
            .values()
            .filter(|t| t.state() == TradeState::Placed && t.currency_pair == currency_pair)
            .max_by_key(|t| t.placed_at)
            .map(|t| t.trade_id.clone())
    }

    pub fn get(&self, trade_id: &str) -> Option<PendingTrade> {
        self.trades.lock().get(trade_id).cloned()
    }

    /// `true` once the trade is resolved or no longer in the ledger.
    pub fn is_settled(&self, trade_id: &str) -> bool {
        self.trades.lock().get(trade_id).map_or(true, |t| t.resolved)
    }

    /// Drops the entry, whether abandoned or archived after reporting.
    pub fn remove(&self, trade_id: &str) -> Option<PendingTrade> {
        self.trades.lock().remove(trade_id)
    }

    pub fn len(&self) -> usize {
        self.trades.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::Direction;

    fn new_trade(pair: &str) -> NewTrade {
        NewTrade {
            currency_pair: pair.into(),
            direction: Direction::Buy,
            timeframe: "M1".into(),
            chain_id: "chain".into(),
            martingale_level: 0,
            amount: 1.0,
        }
    }

    fn placed(registry: &TradeRegistry, pair: &str, at: DateTime<Utc>) -> String {
        let id = registry.register(new_trade(pair));
        assert!(registry.mark_placed(&id, at));
        id
    }

    #[test]
    fn first_resolution_wins() {
        let registry = TradeRegistry::new();
        let id = placed(&registry, "EUR/USD", Utc::now());

        let resolved = registry.resolve(&id, TradeResult::Win).unwrap();
        assert_eq!(resolved.result, Some(TradeResult::Win));
        assert!(registry.resolve(&id, TradeResult::Loss).is_none());
        assert_eq!(registry.get(&id).unwrap().state(), TradeState::Resolved(TradeResult::Win));
    }

    #[test]
    fn unplaced_and_unknown_trades_do_not_resolve() {
        let registry = TradeRegistry::new();
        let id = registry.register(new_trade("EUR/USD"));
        assert!(registry.resolve(&id, TradeResult::Win).is_none());
        assert_eq!(registry.get(&id).unwrap().state(), TradeState::Created);
        assert!(registry.resolve("missing", TradeResult::Win).is_none());
    }

    #[test]
    fn placement_happens_once() {
        let registry = TradeRegistry::new();
        let id = registry.register(new_trade("EUR/USD"));
        let first = Utc::now();
        assert!(registry.mark_placed(&id, first));
        assert!(!registry.mark_placed(&id, first + Duration::seconds(5)));
        assert_eq!(registry.get(&id).unwrap().placed_at, Some(first));
        assert!(!registry.mark_placed("missing", first));
    }

    #[test]
    fn pending_for_is_a_snapshot() {
        let registry = TradeRegistry::new();
        let a = registry.register(new_trade("EUR/USD"));
        let snapshot = registry.pending_for("EUR/USD");

        let b = registry.register(new_trade("EUR/USD"));
        registry.remove(&a);

        assert_eq!(snapshot, HashSet::from([a]));
        assert_eq!(registry.pending_for("EUR/USD"), HashSet::from([b]));
    }

    #[test]
    fn latest_placed_uses_placement_recency() {
        let registry = TradeRegistry::new();
        let now = Utc::now();
        let older = placed(&registry, "EUR/USD", now - Duration::seconds(30));
        let newer = placed(&registry, "EUR/USD", now);
        let _unplaced = registry.register(new_trade("EUR/USD"));
        placed(&registry, "GBP/USD", now);

        assert_eq!(registry.latest_placed_for("EUR/USD"), Some(newer.clone()));
        registry.resolve(&newer, TradeResult::Loss);
        assert_eq!(registry.latest_placed_for("EUR/USD"), Some(older));
        assert_eq!(
            registry.outstanding_pairs(),
            HashSet::from(["EUR/USD".to_string(), "GBP/USD".to_string()])
        );
    }

    #[test]
    fn removed_or_resolved_trades_are_settled() {
        let registry = TradeRegistry::new();
        let id = placed(&registry, "EUR/USD", Utc::now());
        assert!(!registry.is_settled(&id));
        registry.resolve(&id, TradeResult::NoResult);
        assert!(registry.is_settled(&id));
        registry.remove(&id);
        assert!(registry.is_settled(&id));
        assert!(registry.is_empty());
    }
}
