//! Error types for the chart module.

use thiserror::Error;

use crate::trader::object::ChartKey;

/// Errors returned by chart operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChartError {
    #[error("no open chart for {0}")]
    UnknownChart(ChartKey),

    #[error("chart {0} has no bars")]
    EmptyStore(ChartKey),

    #[error("replay is not active for {0}")]
    ReplayInactive(ChartKey),

    #[error("bar index {index} out of range for {len} bars")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid replay speed {0}")]
    InvalidSpeed(f64),

    #[error("chart runtime has shut down")]
    RuntimeClosed,
}

/// Why a bar was left out of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BarRejection {
    #[error("price or volume is not finite")]
    NonFinite,

    #[error("high/low do not enclose open and close")]
    InconsistentRange,

    #[error("negative volume")]
    NegativeVolume,

    #[error("time is not aligned to the interval")]
    Misaligned,

    #[error("bar belongs to another chart key")]
    ForeignKey,
}
