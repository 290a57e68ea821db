//! Chart items: the points handed to the renderer for candles, volume and
//! indicator lines.

use serde::{Deserialize, Serialize};

use super::base::{format_price, format_volume, Color, DOWN_VOLUME_COLOR, UP_VOLUME_COLOR};
use crate::trader::object::BarData;

/// One candlestick, `time` in unix seconds of the bar open
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandlePoint {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl From<&BarData> for CandlePoint {
    fn from(bar: &BarData) -> Self {
        Self {
            time: bar.datetime.timestamp(),
            open: bar.open_price,
            high: bar.high_price,
            low: bar.low_price,
            close: bar.close_price,
        }
    }
}

/// One volume histogram column, coloured by candle direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumePoint {
    pub time: i64,
    pub value: f64,
    pub color: Color,
}

impl From<&BarData> for VolumePoint {
    fn from(bar: &BarData) -> Self {
        Self {
            time: bar.datetime.timestamp(),
            value: bar.volume,
            color: if bar.is_rising() { UP_VOLUME_COLOR } else { DOWN_VOLUME_COLOR },
        }
    }
}

/// One point of an overlay line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinePoint {
    pub time: i64,
    pub value: f64,
}

pub fn candle_points(bars: &[BarData]) -> Vec<CandlePoint> {
    bars.iter().map(CandlePoint::from).collect()
}

pub fn volume_points(bars: &[BarData]) -> Vec<VolumePoint> {
    bars.iter().map(VolumePoint::from).collect()
}

/// Line point for one bar; `None` while the indicator has no value there
pub fn line_point(bar: &BarData, value: Option<f64>) -> Option<LinePoint> {
    value.map(|value| LinePoint {
        time: bar.datetime.timestamp(),
        value,
    })
}

/// Line points for the bars that have an indicator value
pub fn line_points(bars: &[BarData], values: &[Option<f64>]) -> Vec<LinePoint> {
    bars.iter()
        .zip(values)
        .filter_map(|(bar, value)| line_point(bar, *value))
        .collect()
}

/// Crosshair info text for a bar
pub fn info_text(bar: &BarData, decimals: usize) -> String {
    format!(
        "Date\n{}\n\nTime\n{}\n\nOpen\n{}\n\nHigh\n{}\n\nLow\n{}\n\nClose\n{}\n\nVolume\n{}",
        bar.datetime.format("%Y-%m-%d"),
        bar.datetime.format("%H:%M"),
        format_price(bar.open_price, decimals),
        format_price(bar.high_price, decimals),
        format_price(bar.low_price, decimals),
        format_price(bar.close_price, decimals),
        format_volume(bar.volume),
    )
}
