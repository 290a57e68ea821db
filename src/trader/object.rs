//! Basic data structures exchanged between the chart engine and its collaborators.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::constant::{Exchange, Interval};

/// Candlestick bar data of a certain trading period.
///
/// `datetime` is the bar open, aligned to the interval grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarData {
    pub symbol: String,
    pub exchange: Exchange,
    pub interval: Interval,
    pub datetime: DateTime<Utc>,

    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub volume: f64,
}

impl BarData {
    /// Create a new BarData with zeroed prices
    pub fn new(symbol: String, exchange: Exchange, interval: Interval, datetime: DateTime<Utc>) -> Self {
        Self {
            symbol,
            exchange,
            interval,
            datetime,
            open_price: 0.0,
            high_price: 0.0,
            low_price: 0.0,
            close_price: 0.0,
            volume: 0.0,
        }
    }

    /// Get vt_symbol (symbol.exchange)
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange.value())
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high_price + self.low_price + self.close_price) / 3.0
    }

    /// Whether the bar closed at or above its open
    pub fn is_rising(&self) -> bool {
        self.close_price >= self.open_price
    }
}

/// Identity of one chart's bar series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChartKey {
    pub symbol: String,
    pub exchange: Exchange,
    pub interval: Interval,
}

impl ChartKey {
    pub fn new(symbol: impl Into<String>, exchange: Exchange, interval: Interval) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            exchange,
            interval,
        }
    }

    /// Get vt_symbol (symbol.exchange)
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange.value())
    }
}

impl fmt::Display for ChartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.symbol, self.exchange.value(), self.interval.value())
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, swapping the bounds if given in reverse
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Request sent to the market data service for a range of bars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub symbol: String,
    pub exchange: Exchange,
    pub interval: Interval,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl HistoryRequest {
    pub fn new(key: &ChartKey, range: DateRange) -> Self {
        Self {
            symbol: key.symbol.clone(),
            exchange: key.exchange,
            interval: key.interval,
            start: range.start,
            end: range.end,
        }
    }

    /// Get vt_symbol (symbol.exchange)
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange.value())
    }
}

/// One OHLCV record as delivered by the market data service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvRecord {
    pub fn into_bar(self, req: &HistoryRequest) -> BarData {
        BarData {
            symbol: req.symbol.clone(),
            exchange: req.exchange,
            interval: req.interval,
            datetime: self.time,
            open_price: self.open,
            high_price: self.high,
            low_price: self.low,
            close_price: self.close,
            volume: self.volume,
        }
    }
}

/// Last traded price for a symbol, as pushed by a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    /// Known when the session holds a position in the symbol
    pub exchange: Option<Exchange>,
    pub price: f64,
    pub datetime: DateTime<Utc>,
}

impl PriceTick {
    /// Whether the tick belongs to the chart key. Ticks without an exchange
    /// match the symbol on any exchange.
    pub fn matches(&self, key: &ChartKey) -> bool {
        self.symbol == key.symbol && self.exchange.map_or(true, |exchange| exchange == key.exchange)
    }
}

/// Open position inside a session snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPosition {
    pub symbol: String,
    pub exchange: String,
    pub side: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub pnl_percent: f64,
}

/// State of a running trading session pushed over the snapshot channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: String,
    pub portfolio_value: f64,
    pub cash: f64,
    pub total_pnl: f64,
    pub positions: Vec<SnapshotPosition>,
    pub open_orders: u32,
    pub total_trades: u32,
    pub total_charges: f64,
    pub prices: HashMap<String, f64>,
}

impl SessionSnapshot {
    /// Price ticks carried by the snapshot, stamped with the receive time.
    ///
    /// Zero prices mean the session has not seen the symbol trade yet.
    pub fn ticks(&self, received: DateTime<Utc>) -> Vec<PriceTick> {
        let mut ticks: Vec<PriceTick> = self
            .prices
            .iter()
            .filter(|(_, price)| price.is_finite() && **price > 0.0)
            .map(|(symbol, price)| {
                let symbol = symbol.to_uppercase();
                let exchange = self
                    .positions
                    .iter()
                    .find(|position| position.symbol.eq_ignore_ascii_case(&symbol))
                    .and_then(|position| position.exchange.parse().ok());
                PriceTick {
                    symbol,
                    exchange,
                    price: *price,
                    datetime: received,
                }
            })
            .collect();
        ticks.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        ticks
    }
}
