use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use tracing::info;

use common::{Direction, FrameSource, Result, UiDriver};

/// Frame size served when no scripted frame is queued.
const BLANK_WIDTH: u32 = 320;
const BLANK_HEIGHT: u32 = 180;

/// A trade the paper driver accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperTrade {
    pub instrument: Option<String>,
    pub timeframe: Option<String>,
    pub direction: Direction,
    pub amount: f64,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Selection {
    instrument: Option<String>,
    timeframe: Option<String>,
}

/// Simulated platform for dry runs.
///
/// Selections always succeed and placed trades are only recorded. Frames
/// come from a scripted queue; when it is empty a blank frame is served,
/// which the classifier reads as "no result" so every trade ends NO_RESULT.
/// Nothing is ever sent to the real platform.
#[derive(Debug, Default)]
pub struct PaperDriver {
    selection: Mutex<Selection>,
    trades: Mutex<Vec<PaperTrade>>,
    frames: Mutex<VecDeque<RgbImage>>,
}

impl PaperDriver {
    pub fn new() -> Self {
        info!("PaperDriver initialized");
        Self::default()
    }

    /// Queues a frame to be returned by the next `capture_frame`.
    pub fn push_frame(&self, frame: RgbImage) {
        self.frames.lock().push_back(frame);
    }

    /// Trades placed so far, oldest first.
    pub fn trades(&self) -> Vec<PaperTrade> {
        self.trades.lock().clone()
    }
}

#[async_trait]
impl UiDriver for PaperDriver {
    async fn select_instrument(&self, name: &str) -> Result<bool> {
        self.selection.lock().instrument = Some(name.to_string());
        Ok(true)
    }

    async fn select_timeframe(&self, timeframe: &str) -> Result<bool> {
        self.selection.lock().timeframe = Some(timeframe.to_string());
        Ok(true)
    }

    async fn place_trade(&self, direction: Direction, amount: f64) -> Result<bool> {
        let (instrument, timeframe) = {
            let selection = self.selection.lock();
            (selection.instrument.clone(), selection.timeframe.clone())
        };
        info!(
            instrument = ?instrument,
            timeframe = ?timeframe,
            direction = %direction,
            amount,
            "Paper trade placed"
        );
        self.trades.lock().push(PaperTrade {
            instrument,
            timeframe,
            direction,
            amount,
            placed_at: Utc::now(),
        });
        Ok(true)
    }
}

#[async_trait]
impl FrameSource for PaperDriver {
    async fn capture_frame(&self) -> Result<RgbImage> {
        Ok(self.frames.lock().pop_front().unwrap_or_else(|| {
            RgbImage::from_pixel(BLANK_WIDTH, BLANK_HEIGHT, Rgb([18, 20, 28]))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placed_trade_records_current_selection() {
        let driver = PaperDriver::new();
        assert!(driver.select_instrument("EUR/USD").await.unwrap());
        assert!(driver.select_timeframe("M1").await.unwrap());
        assert!(driver.place_trade(Direction::Buy, 2.0).await.unwrap());

        let trades = driver.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].instrument.as_deref(), Some("EUR/USD"));
        assert_eq!(trades[0].timeframe.as_deref(), Some("M1"));
        assert_eq!(trades[0].direction, Direction::Buy);
        assert_eq!(trades[0].amount, 2.0);
    }

    #[tokio::test]
    async fn scripted_frames_come_first_then_blank() {
        let driver = PaperDriver::new();
        driver.push_frame(RgbImage::from_pixel(2, 2, Rgb([0, 200, 0])));

        let scripted = driver.capture_frame().await.unwrap();
        assert_eq!(scripted.dimensions(), (2, 2));

        let blank = driver.capture_frame().await.unwrap();
        assert_eq!(blank.dimensions(), (BLANK_WIDTH, BLANK_HEIGHT));
        assert!(blank.pixels().all(|p| p.0 == [18, 20, 28]));
    }
}
