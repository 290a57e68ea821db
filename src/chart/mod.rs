//! Chart module: candlestick series with indicator overlays, live updates,
//! older-history paging and bar replay.
//!
//! This module provides:
//! - `BarStore` - Ordered, deduplicated bar storage with datetime indexing
//! - `IndicatorSet` - EMA, SMA, Bollinger, VWAP and CPR overlays
//! - `ChartWidget` - One chart's state machine over a `RenderAdapter`
//! - `ChartEngine` / `ChartRuntime` - Arena of charts and the task driving it
//!
//! # Example
//!
//! ```ignore
//! use chart_engine::chart::{ChartRuntime, EngineConfig, MemoryRenderer};
//! use chart_engine::trader::Settings;
//!
//! let preferences = Arc::new(Settings::in_memory());
//! let (runtime, handle) = ChartRuntime::new(EngineConfig::default(), preferences, datafeed);
//! tokio::spawn(runtime.run());
//! handle.open_chart(key, range, Box::new(MemoryRenderer::new())).await?;
//! ```

mod base;
mod config;
mod engine;
mod error;
mod history;
mod indicator;
mod item;
mod live;
mod manager;
mod render;
mod replay;
mod widget;

#[cfg(test)]
mod fixtures;

pub use base::*;
pub use config::{default_lookback_days, ChartPreferences, EngineConfig};
pub use engine::{
    ChartCommand, ChartEngine, ChartHandle, ChartRuntime, FetchPurpose, FetchRequest, FetchTicket,
    ReplayAction,
};
pub use error::{BarRejection, ChartError};
pub use history::{HistoryPager, HistoryStatus};
pub use indicator::*;
pub use item::{candle_points, info_text, line_point, line_points, volume_points, CandlePoint, LinePoint, VolumePoint};
pub use live::LiveUpdater;
pub use manager::{price_range, volume_range, AppendOutcome, BarStore, MergeReport};
pub use render::{
    LogicalRange, MemoryRenderer, RenderAdapter, RenderState, TimeRange, ViewportEvent,
    ViewportListener,
};
pub use replay::{ReplayController, ReplayPhase, ReplayState};
pub use widget::{ChartInfo, ChartStatus, ChartWidget, VisibleWindow};
