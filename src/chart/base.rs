//! Base constants and utility functions for the chart module.

use serde::{Deserialize, Serialize};

/// RGBA colour handed to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn from_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// CSS hex notation, alpha omitted when opaque
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

// Price movement colors
pub const UP_COLOR: Color = Color::from_rgb(38, 166, 154);
pub const DOWN_COLOR: Color = Color::from_rgb(239, 83, 80);
pub const UP_VOLUME_COLOR: Color = Color::from_rgba(38, 166, 154, 128);
pub const DOWN_VOLUME_COLOR: Color = Color::from_rgba(239, 83, 80, 128);

// Indicator colors
pub const EMA_FAST_COLOR: Color = Color::from_rgb(255, 193, 7);
pub const EMA_SLOW_COLOR: Color = Color::from_rgb(156, 39, 176);
pub const SMA_COLOR: Color = Color::from_rgb(33, 150, 243);
pub const BOLL_BAND_COLOR: Color = Color::from_rgb(120, 144, 156);
pub const BOLL_MIDDLE_COLOR: Color = Color::from_rgb(255, 152, 0);
pub const VWAP_COLOR: Color = Color::from_rgb(0, 188, 212);
pub const PIVOT_COLOR: Color = Color::from_rgb(255, 235, 59);
pub const RESISTANCE_COLOR: Color = Color::from_rgb(239, 83, 80);
pub const SUPPORT_COLOR: Color = Color::from_rgb(76, 175, 80);

/// Line style for overlays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

/// Appearance of an overlay line series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayStyle {
    pub title: String,
    pub color: Color,
    pub style: LineStyle,
    pub width: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            title: String::new(),
            color: PIVOT_COLOR,
            style: LineStyle::Solid,
            width: LINE_WIDTH,
        }
    }
}

// Chart dimensions
pub const LINE_WIDTH: f32 = 1.5;
pub const BAND_WIDTH: f32 = 1.0;

// Engine knobs, overridable through settings
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_TRIGGER_BARS: usize = 10;
pub const DEFAULT_REPLAY_BASE_MS: u64 = 1_000;
pub const DEFAULT_REPLAY_FLOOR_MS: u64 = 50;

/// Decimals shown for prices
pub const PRICE_DECIMALS: usize = 2;

/// Format price with appropriate precision
pub fn format_price(price: f64, decimals: usize) -> String {
    format!("{:.prec$}", price, prec = decimals)
}

/// Format volume with appropriate units (K, M, B)
pub fn format_volume(volume: f64) -> String {
    if volume >= 1_000_000_000.0 {
        format!("{:.2}B", volume / 1_000_000_000.0)
    } else if volume >= 1_000_000.0 {
        format!("{:.2}M", volume / 1_000_000.0)
    } else if volume >= 1_000.0 {
        format!("{:.2}K", volume / 1_000.0)
    } else {
        format!("{:.2}", volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_volume() {
        assert_eq!(format_volume(100.0), "100.00");
        assert_eq!(format_volume(1500.0), "1.50K");
        assert_eq!(format_volume(1500000.0), "1.50M");
        assert_eq!(format_volume(1500000000.0), "1.50B");
    }

    #[test]
    fn test_color_hex() {
        assert_eq!(UP_COLOR.to_hex(), "#26a69a");
        assert_eq!(DOWN_VOLUME_COLOR.to_hex(), "#ef535080");
        assert_eq!(format_price(612.456, 2), "612.46");
    }
}
