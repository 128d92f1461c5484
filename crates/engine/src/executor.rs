use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use common::{
    EngineState, NewTrade, ResultSink, ScheduledTrade, TradeEvent, TradeResult, UiDriver,
};

use crate::dispatcher::ResultDispatcher;
use crate::emit;
use crate::readiness::ReadinessGate;
use crate::registry::TradeRegistry;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Stake of the entry leg. Leg `n` stakes `base_amount * 2^n`.
    pub base_amount: f64,
    /// Martingale legs allowed after the entry.
    pub max_martingale: u32,
    /// How long before a leg the UI starts being prepared.
    pub prepare_lead: chrono::Duration,
    /// The readiness gate gives up this long before the leg.
    pub gate_margin: chrono::Duration,
    pub gate_poll_interval: Duration,
    /// A leg not yet placed this long after its instant is abandoned.
    pub entry_tolerance: chrono::Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_amount: 1.0,
            max_martingale: 2,
            prepare_lead: chrono::Duration::seconds(45),
            gate_margin: chrono::Duration::seconds(20),
            gate_poll_interval: Duration::from_millis(500),
            entry_tolerance: chrono::Duration::seconds(1),
        }
    }
}

#[derive(Debug, Default)]
struct BookInner {
    /// Chains that saw a WIN and must not place further legs.
    won: HashSet<String>,
    chain_by_trade: HashMap<String, String>,
    /// Chain of the most recently placed trade per pair.
    chain_by_pair: HashMap<String, String>,
}

/// Martingale continuation state, fed by the dispatcher's result hooks.
///
/// A WIN on any leg stops the chain; LOSS and NO_RESULT let it continue.
/// Both hooks may report the same trade; repeated reports are harmless.
#[derive(Debug, Default)]
pub struct MartingaleBook {
    inner: Mutex<BookInner>,
}

impl MartingaleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a placed trade with its chain.
    pub fn track(&self, trade_id: &str, chain_id: &str, currency_pair: &str) {
        let mut inner = self.inner.lock();
        inner
            .chain_by_trade
            .insert(trade_id.to_string(), chain_id.to_string());
        inner
            .chain_by_pair
            .insert(currency_pair.to_string(), chain_id.to_string());
    }

    pub fn is_won(&self, chain_id: &str) -> bool {
        self.inner.lock().won.contains(chain_id)
    }

    /// Forgets a finished chain.
    pub fn close(&self, chain_id: &str) {
        let mut inner = self.inner.lock();
        inner.won.remove(chain_id);
        inner.chain_by_trade.retain(|_, c| c != chain_id);
        inner.chain_by_pair.retain(|_, c| c != chain_id);
    }

    fn record(&self, chain_id: Option<String>, result: TradeResult) {
        if result != TradeResult::Win {
            return;
        }
        if let Some(chain_id) = chain_id {
            info!(chain_id = %chain_id, "Chain won, remaining legs cancelled");
            self.inner.lock().won.insert(chain_id);
        }
    }
}

impl ResultSink for MartingaleBook {
    fn on_trade_result(&self, currency_pair: &str, result: TradeResult) {
        let chain = self.inner.lock().chain_by_pair.get(currency_pair).cloned();
        self.record(chain, result);
    }

    fn trade_result_received(&self, trade_id: &str, result: TradeResult) {
        let chain = self.inner.lock().chain_by_trade.get(trade_id).cloned();
        self.record(chain, result);
    }
}

/// Everything one leg needs, shared by all running chains.
struct LegContext {
    registry: Arc<TradeRegistry>,
    gate: ReadinessGate,
    driver: Arc<dyn UiDriver>,
    dispatcher: ResultDispatcher,
    book: Arc<MartingaleBook>,
    event_tx: mpsc::Sender<TradeEvent>,
    engine_state: Arc<RwLock<EngineState>>,
    config: ExecutorConfig,
}

/// How a leg ended, as far as its chain is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegOutcome {
    Placed,
    Skipped,
    /// The chain won or the engine stopped; no later leg may run.
    Halted,
}

/// Receives scheduled trades and runs each as a martingale chain.
///
/// This is the ONLY component that calls `UiDriver::place_trade`.
pub struct TradeExecutor {
    trade_rx: mpsc::Receiver<ScheduledTrade>,
    ctx: Arc<LegContext>,
}

impl TradeExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trade_rx: mpsc::Receiver<ScheduledTrade>,
        registry: Arc<TradeRegistry>,
        driver: Arc<dyn UiDriver>,
        dispatcher: ResultDispatcher,
        book: Arc<MartingaleBook>,
        event_tx: mpsc::Sender<TradeEvent>,
        engine_state: Arc<RwLock<EngineState>>,
        config: ExecutorConfig,
    ) -> Self {
        let gate = ReadinessGate::new(driver.clone(), config.gate_poll_interval);
        Self {
            trade_rx,
            ctx: Arc::new(LegContext {
                registry,
                gate,
                driver,
                dispatcher,
                book,
                event_tx,
                engine_state,
                config,
            }),
        }
    }

    /// Run the executor loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            base_amount = self.ctx.config.base_amount,
            max_martingale = self.ctx.config.max_martingale,
            "TradeExecutor running"
        );
        while let Some(trade) = self.trade_rx.recv().await {
            tokio::spawn(self.ctx.clone().run_chain(trade));
        }
        warn!("TradeExecutor: trade channel closed");
    }
}

impl LegContext {
    async fn run_chain(self: Arc<Self>, trade: ScheduledTrade) {
        let chain_id = Uuid::new_v4().to_string();
        let max_legs = self.config.max_martingale as usize + 1;
        let total = trade.martingale_instants.len() + 1;
        if total > max_legs {
            info!(pair = %trade.currency_pair, legs = total, max_legs, "Martingale legs capped");
        }

        for (level, instant) in trade.legs().take(max_legs).enumerate() {
            let level = level as u32;
            if self.run_leg(&trade, &chain_id, level, instant).await == LegOutcome::Halted {
                break;
            }
        }
        self.book.close(&chain_id);
    }

    async fn run_leg(
        &self,
        trade: &ScheduledTrade,
        chain_id: &str,
        level: u32,
        instant: DateTime<FixedOffset>,
    ) -> LegOutcome {
        let pair = trade.currency_pair.as_str();
        let amount = self.config.base_amount * 2f64.powi(level as i32);

        sleep_until(instant.with_timezone(&Utc) - self.config.prepare_lead).await;
        if self.must_halt(pair, chain_id, level, None).await {
            return LegOutcome::Halted;
        }

        let trade_id = self.registry.register(NewTrade {
            currency_pair: pair.to_string(),
            direction: trade.direction,
            timeframe: trade.timeframe.clone(),
            chain_id: chain_id.to_string(),
            martingale_level: level,
            amount,
        });

        let readiness = self
            .gate
            .confirm_ready(pair, instant, &trade.timeframe, self.config.gate_margin)
            .await;
        if !readiness.ready {
            self.registry.remove(&trade_id);
            emit(
                &self.event_tx,
                TradeEvent::GateFailed {
                    pair: pair.to_string(),
                    timeframe: trade.timeframe.clone(),
                    level,
                },
            );
            return LegOutcome::Skipped;
        }

        let entry = instant.with_timezone(&Utc);
        sleep_until(entry).await;
        if self.must_halt(pair, chain_id, level, Some(&trade_id)).await {
            return LegOutcome::Halted;
        }

        let late = Utc::now() - entry;
        if late > self.config.entry_tolerance {
            warn!(pair, level, late_ms = late.num_milliseconds(), "Entry missed, leg not placed");
            self.registry.remove(&trade_id);
            emit(
                &self.event_tx,
                TradeEvent::Expired {
                    pair: pair.to_string(),
                    level,
                    late_ms: late.num_milliseconds(),
                },
            );
            return LegOutcome::Skipped;
        }

        info!(pair, direction = %trade.direction, amount, level, "Placing trade");
        let failure = match self.driver.place_trade(trade.direction, amount).await {
            Ok(true) => None,
            Ok(false) => Some("platform did not confirm placement".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(error) = failure {
            error!(pair, level, error = %error, "Trade placement failed");
            self.registry.remove(&trade_id);
            emit(
                &self.event_tx,
                TradeEvent::PlacementFailed {
                    pair: pair.to_string(),
                    level,
                    error,
                },
            );
            return LegOutcome::Skipped;
        }

        self.book.track(&trade_id, chain_id, pair);
        self.registry.mark_placed(&trade_id, Utc::now());
        if let Some(placed) = self.registry.get(&trade_id) {
            emit(&self.event_tx, TradeEvent::Placed { trade: placed });
        }
        self.dispatcher.spawn_watcher(trade_id);
        LegOutcome::Placed
    }

    /// A won chain or a stopped engine ends the chain before `level`.
    /// The leg's ledger entry, if already registered, is abandoned.
    async fn must_halt(
        &self,
        pair: &str,
        chain_id: &str,
        level: u32,
        trade_id: Option<&str>,
    ) -> bool {
        let won = self.book.is_won(chain_id);
        let stopped = *self.engine_state.read().await != EngineState::Running;
        if !won && !stopped {
            return false;
        }
        if let Some(trade_id) = trade_id {
            self.registry.remove(trade_id);
        }
        if won {
            emit(
                &self.event_tx,
                TradeEvent::MartingaleStopped {
                    pair: pair.to_string(),
                    chain_id: chain_id.to_string(),
                    skipped_level: level,
                },
            );
        } else {
            info!(pair, level, "Engine stopped, abandoning chain");
        }
        true
    }
}

async fn sleep_until(at: DateTime<Utc>) {
    if let Ok(wait) = (at - Utc::now()).to_std() {
        tokio::time::sleep(wait).await;
    }
}
