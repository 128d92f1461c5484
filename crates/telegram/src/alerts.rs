use common::{DropReason, TradeEvent, TradeResult};

/// Operator-facing text for a trade event, or `None` for events that are
/// only logged.
pub fn alert_text(event: &TradeEvent) -> Option<String> {
    let text = match event {
        TradeEvent::Scheduled { .. } => return None,
        TradeEvent::Dropped {
            reason: DropReason::EngineNotRunning,
            ..
        } => return None,
        TradeEvent::Dropped { pair, reason } => {
            let pair = pair.as_deref().unwrap_or("unknown pair");
            format!("⛔ Signal on {pair} dropped: {reason}")
        }
        TradeEvent::GateFailed {
            pair,
            timeframe,
            level,
        } => format!("⚠️ {pair} {timeframe} not ready in time, leg {level} skipped."),
        TradeEvent::Placed { trade } => format!(
            "📤 {} {} placed, stake {:.2} (leg {}).",
            trade.currency_pair, trade.direction, trade.amount, trade.martingale_level
        ),
        TradeEvent::PlacementFailed { pair, level, error } => {
            format!("🚨 Placement failed on {pair} (leg {level}): {error}")
        }
        TradeEvent::Expired {
            pair,
            level,
            late_ms,
        } => format!("⌛ {pair} leg {level} expired, {late_ms}ms past entry. Not placed."),
        TradeEvent::Resolved { trade } => {
            let icon = match trade.result {
                Some(TradeResult::Win) => "✅",
                Some(TradeResult::Loss) => "❌",
                Some(TradeResult::NoResult) | None => "❔",
            };
            let result = trade
                .result
                .map_or_else(|| "UNKNOWN".to_string(), |r| r.to_string());
            format!(
                "{icon} {} {} leg {}: {result}",
                trade.currency_pair, trade.direction, trade.martingale_level
            )
        }
        TradeEvent::MartingaleStopped {
            pair,
            skipped_level,
            ..
        } => format!("🏁 {pair} chain won, legs from {skipped_level} cancelled."),
    };
    Some(text)
}
