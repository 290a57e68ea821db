//! Trader module - market data plumbing around the chart engine.
//!
//! - **constant**: Exchange and Interval enums
//! - **object**: BarData, ChartKey, HistoryRequest, SessionSnapshot, ...
//! - **setting**: Global and session-scoped key-value settings
//! - **utility**: Trader directory and exchange calendar helpers
//! - **datafeed**: Datafeed abstraction over the market data service
//! - **snapshot**: Session snapshot push channel listener
//! - **logger**: Logging setup

pub mod constant;
pub mod datafeed;
pub mod logger;
pub mod object;
pub mod setting;
pub mod snapshot;
pub mod utility;

// Re-exports for convenience
pub use constant::{Exchange, Interval};
pub use datafeed::{BaseDatafeed, DatafeedError, EmptyDatafeed, MemoryDatafeed, RestDatafeed};
pub use logger::{init_logger, init_logger_with, CRITICAL, DEBUG, ERROR, INFO, WARNING};
pub use object::{
    BarData, ChartKey, DateRange, HistoryRequest, OhlcvRecord, PriceTick, SessionSnapshot,
    SnapshotPosition,
};
pub use setting::{SettingError, SettingValue, Settings, SETTINGS};
pub use snapshot::{SnapshotError, SnapshotFeed};
pub use utility::{
    bucket_start, exchange_today, get_file_path, get_folder_path, is_aligned, local_date,
    TEMP_DIR, TRADER_DIR,
};
