use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use common::{Error, PendingTrade, Result, TradeResult, TradingMode};

/// Win/loss tally over the journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalSummary {
    pub wins: i64,
    pub losses: i64,
    pub no_results: i64,
}

impl JournalSummary {
    pub fn total(&self) -> i64 {
        self.wins + self.losses + self.no_results
    }
}

/// Archive of resolved trades in SQLite.
#[derive(Clone)]
pub struct TradeJournal {
    db: SqlitePool,
    mode: TradingMode,
}

impl TradeJournal {
    pub fn new(db: SqlitePool, mode: TradingMode) -> Self {
        Self { db, mode }
    }

    /// Archives a resolved trade. Re-recording the same id is a no-op.
    pub async fn record(&self, trade: &PendingTrade) -> Result<()> {
        let result = trade
            .result
            .ok_or_else(|| Error::Other(format!("trade {} is not resolved", trade.trade_id)))?;

        sqlx::query(
            r#"
            INSERT INTO trades (id, chain_id, pair, direction, timeframe, martingale_level,
                                amount, result, mode, created_at, placed_at, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&trade.trade_id)
        .bind(&trade.chain_id)
        .bind(&trade.currency_pair)
        .bind(trade.direction)
        .bind(&trade.timeframe)
        .bind(trade.martingale_level as i64)
        .bind(trade.amount)
        .bind(result)
        .bind(self.mode.to_string())
        .bind(trade.created_at.to_rfc3339())
        .bind(trade.placed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        debug!(trade_id = %trade.trade_id, result = %result, "Trade journaled");
        Ok(())
    }

    pub async fn summary(&self) -> Result<JournalSummary> {
        let rows: Vec<(TradeResult, i64)> =
            sqlx::query_as("SELECT result, COUNT(*) FROM trades WHERE mode = ?1 GROUP BY result")
                .bind(self.mode.to_string())
                .fetch_all(&self.db)
                .await?;

        let mut summary = JournalSummary::default();
        for (result, count) in rows {
            match result {
                TradeResult::Win => summary.wins = count,
                TradeResult::Loss => summary.losses = count,
                TradeResult::NoResult => summary.no_results = count,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Direction, NewTrade};

    async fn journal() -> TradeJournal {
        let db = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&db).await.unwrap();
        TradeJournal::new(db, TradingMode::Paper)
    }

    fn resolved(result: TradeResult) -> PendingTrade {
        let mut trade = PendingTrade::open(NewTrade {
            currency_pair: "EUR/USD".into(),
            direction: Direction::Buy,
            timeframe: "M1".into(),
            chain_id: "chain".into(),
            martingale_level: 1,
            amount: 2.0,
        });
        trade.placed_at = Some(Utc::now());
        trade.resolved = true;
        trade.result = Some(result);
        trade
    }

    #[tokio::test]
    async fn records_and_summarises() {
        let journal = journal().await;
        let win = resolved(TradeResult::Win);
        journal.record(&win).await.unwrap();
        journal.record(&win).await.unwrap();
        journal.record(&resolved(TradeResult::Loss)).await.unwrap();
        journal.record(&resolved(TradeResult::NoResult)).await.unwrap();

        let summary = journal.summary().await.unwrap();
        assert_eq!(
            summary,
            JournalSummary {
                wins: 1,
                losses: 1,
                no_results: 1
            }
        );
        assert_eq!(summary.total(), 3);
    }

    #[tokio::test]
    async fn unresolved_trade_is_rejected() {
        let journal = journal().await;
        let mut trade = resolved(TradeResult::Win);
        trade.result = None;
        assert!(journal.record(&trade).await.is_err());
        assert_eq!(journal.summary().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn other_modes_are_not_counted() {
        let journal = journal().await;
        journal.record(&resolved(TradeResult::Win)).await.unwrap();
        let live = TradeJournal::new(journal.db.clone(), TradingMode::Live);
        assert_eq!(live.summary().await.unwrap().total(), 0);
    }
}
