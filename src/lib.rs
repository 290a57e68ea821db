//! Chart Engine - candlestick charts over a market data service
//!
//! This crate provides:
//!
//! - Bar storage with ordering, dedup and validation
//! - Indicator overlays (EMA, SMA, Bollinger, VWAP, CPR)
//! - Live polling and session snapshot ticks for intraday charts
//! - Lazy loading of older history while scrolling left
//! - Bar replay with step, play, pause, seek and speed control
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chart_engine::chart::{ChartRuntime, EngineConfig, MemoryRenderer};
//! use chart_engine::trader::{ChartKey, DateRange, Exchange, Interval, MemoryDatafeed, Settings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let datafeed = Arc::new(MemoryDatafeed::new());
//!     let (runtime, handle) =
//!         ChartRuntime::new(EngineConfig::default(), Arc::new(Settings::in_memory()), datafeed);
//!     tokio::spawn(runtime.run());
//!
//!     let key = ChartKey::new("SBIN", Exchange::Nse, Interval::Minute5);
//!     let today = chrono::Utc::now().date_naive();
//!     let range = DateRange::new(today, today);
//!     let _ = handle.open_chart(key, range, Box::new(MemoryRenderer::new())).await;
//! }
//! ```

pub mod chart;
pub mod trader;

// Re-export commonly used types
pub use chart::{
    ChartEngine, ChartError, ChartHandle, ChartInfo, ChartRuntime, ChartStatus, EngineConfig,
    IndicatorConfig, MemoryRenderer, RenderAdapter, ReplayAction, ReplayState,
};
pub use trader::{
    BarData, BaseDatafeed, ChartKey, DateRange, Exchange, HistoryRequest, Interval, SessionSnapshot,
};
