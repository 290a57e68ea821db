//! Technical indicators for charting.
//!
//! Every series is aligned 1:1 with the bar sequence; leading points that
//! do not have enough history yet are `None`, never zero.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ta::indicators::SimpleMovingAverage;
use ta::Next;

use super::base::{
    Color, LineStyle, OverlayStyle, BAND_WIDTH, BOLL_BAND_COLOR, BOLL_MIDDLE_COLOR,
    EMA_FAST_COLOR, EMA_SLOW_COLOR, LINE_WIDTH, PIVOT_COLOR, RESISTANCE_COLOR, SMA_COLOR,
    SUPPORT_COLOR, VWAP_COLOR,
};
use crate::trader::object::BarData;
use crate::trader::utility::local_date;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_STD_DEV_MULTIPLIER: f64 = 2.0;

// ==================== Series functions ====================

/// Simple moving average of the trailing `period` values
pub fn sma_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; closes.len()];
    let Ok(mut indicator) = SimpleMovingAverage::new(period) else {
        return values;
    };

    for (i, close) in closes.iter().enumerate() {
        let average = indicator.next(*close);
        if i + 1 >= period {
            values[i] = Some(average);
        }
    }
    values
}

/// Exponential moving average seeded with the SMA of the first `period` values
pub fn ema_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return values;
    }

    let multiplier = ema_multiplier(period);
    let mut ema = closes[..period].iter().sum::<f64>() / period as f64;
    values[period - 1] = Some(ema);

    for (i, close) in closes.iter().enumerate().skip(period) {
        ema = close * multiplier + ema * (1.0 - multiplier);
        values[i] = Some(ema);
    }
    values
}

fn ema_multiplier(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// Bollinger point over one window: (upper, middle, lower)
pub fn bollinger_point(window: &[f64], std_dev: f64) -> (f64, f64, f64) {
    let len = window.len() as f64;
    let mean = window.iter().sum::<f64>() / len;
    // Population standard deviation
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / len;
    let width = std_dev * variance.sqrt();
    (mean + width, mean, mean - width)
}

/// Bollinger bands as (upper, middle, lower) series
pub fn bollinger_series(
    closes: &[f64],
    period: usize,
    std_dev: f64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut upper = vec![None; closes.len()];
    let mut middle = vec![None; closes.len()];
    let mut lower = vec![None; closes.len()];

    if period == 0 || closes.len() < period {
        return (upper, middle, lower);
    }

    for i in (period - 1)..closes.len() {
        let (u, m, l) = bollinger_point(&closes[i + 1 - period..=i], std_dev);
        upper[i] = Some(u);
        middle[i] = Some(m);
        lower[i] = Some(l);
    }
    (upper, middle, lower)
}

/// Session VWAP, cumulative sums restart on every exchange-local day.
///
/// While the day has traded no volume yet the typical price stands in.
pub fn vwap_series(bars: &[BarData]) -> Vec<Option<f64>> {
    let mut values = Vec::with_capacity(bars.len());
    let mut cumulative_pv = 0.0;
    let mut cumulative_v = 0.0;
    let mut current_day: Option<NaiveDate> = None;

    for bar in bars {
        let day = local_date(bar.datetime, bar.exchange);
        if current_day != Some(day) {
            current_day = Some(day);
            cumulative_pv = 0.0;
            cumulative_v = 0.0;
        }

        let typical_price = bar.typical_price();
        cumulative_pv += typical_price * bar.volume;
        cumulative_v += bar.volume;

        values.push(Some(vwap_value(cumulative_pv, cumulative_v, typical_price)));
    }
    values
}

fn vwap_value(cumulative_pv: f64, cumulative_v: f64, typical_price: f64) -> f64 {
    if cumulative_v > 0.0 {
        cumulative_pv / cumulative_v
    } else {
        typical_price
    }
}

/// Central pivot range levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CprLevels {
    pub pivot: f64,
    pub bottom_center: f64,
    pub top_center: f64,
    pub r1: f64,
    pub s1: f64,
    pub r2: f64,
    pub s2: f64,
}

impl CprLevels {
    /// Levels from a completed day's high, low and close
    pub fn from_hlc(high: f64, low: f64, close: f64) -> Self {
        let pivot = (high + low + close) / 3.0;
        let bottom_center = (high + low) / 2.0;
        Self {
            pivot,
            bottom_center,
            top_center: 2.0 * pivot - bottom_center,
            r1: 2.0 * pivot - low,
            s1: 2.0 * pivot - high,
            r2: pivot + (high - low),
            s2: pivot - (high - low),
        }
    }

    /// Levels in series order: pivot, bc, tc, r1, s1, r2, s2
    pub fn values(&self) -> [f64; 7] {
        [
            self.pivot,
            self.bottom_center,
            self.top_center,
            self.r1,
            self.s1,
            self.r2,
            self.s2,
        ]
    }
}

/// CPR for the last loaded day, derived from the day before it.
///
/// Returns the day the levels apply to, or `None` with fewer than two days.
pub fn cpr_levels(bars: &[BarData]) -> Option<(NaiveDate, CprLevels)> {
    // (day, high, low, close) per exchange-local day, ascending
    let mut days: Vec<(NaiveDate, f64, f64, f64)> = Vec::new();
    for bar in bars {
        let day = local_date(bar.datetime, bar.exchange);
        match days.last_mut() {
            Some(last) if last.0 == day => {
                last.1 = last.1.max(bar.high_price);
                last.2 = last.2.min(bar.low_price);
                last.3 = bar.close_price;
            }
            _ => days.push((day, bar.high_price, bar.low_price, bar.close_price)),
        }
    }

    if days.len() < 2 {
        return None;
    }
    let (_, high, low, close) = days[days.len() - 2];
    let (current_day, ..) = days[days.len() - 1];
    Some((current_day, CprLevels::from_hlc(high, low, close)))
}

// ==================== Configuration ====================

/// Indicator family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Bollinger,
    Vwap,
    Cpr,
}

impl IndicatorKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            IndicatorKind::Sma => "SMA - Simple Moving Average",
            IndicatorKind::Ema => "EMA - Exponential Moving Average",
            IndicatorKind::Bollinger => "BOLL - Bollinger Bands",
            IndicatorKind::Vwap => "VWAP - Volume Weighted Average Price",
            IndicatorKind::Cpr => "CPR - Central Pivot Range",
        }
    }
}

/// One named entry of the indicator selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorToggle {
    pub kind: IndicatorKind,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev_multiplier: Option<f64>,
}

impl IndicatorToggle {
    pub fn new(kind: IndicatorKind, enabled: bool) -> Self {
        Self {
            kind,
            enabled,
            period: None,
            std_dev_multiplier: None,
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_std_dev(mut self, multiplier: f64) -> Self {
        self.std_dev_multiplier = Some(multiplier);
        self
    }

    /// Build the indicator this toggle describes
    pub fn build(&self, name: &str) -> Box<dyn Indicator> {
        let period = self.period.unwrap_or(DEFAULT_PERIOD);
        match self.kind {
            IndicatorKind::Sma => Box::new(MA::new(name, period, SMA_COLOR)),
            IndicatorKind::Ema => {
                let color = if period > DEFAULT_PERIOD { EMA_SLOW_COLOR } else { EMA_FAST_COLOR };
                Box::new(EMA::new(name, period, color))
            }
            IndicatorKind::Bollinger => Box::new(BOLL::new(
                name,
                period,
                self.std_dev_multiplier.unwrap_or(DEFAULT_STD_DEV_MULTIPLIER),
            )),
            IndicatorKind::Vwap => Box::new(VWAP::new(name)),
            IndicatorKind::Cpr => Box::new(CPR::new(name)),
        }
    }
}

/// Named indicator selection of a chart session.
///
/// Survives chart key changes and serializes to a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorConfig {
    toggles: BTreeMap<String, IndicatorToggle>,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        let mut toggles = BTreeMap::new();
        toggles.insert(
            "ema20".to_string(),
            IndicatorToggle::new(IndicatorKind::Ema, true).with_period(20),
        );
        toggles.insert(
            "ema60".to_string(),
            IndicatorToggle::new(IndicatorKind::Ema, false).with_period(60),
        );
        toggles.insert(
            "sma20".to_string(),
            IndicatorToggle::new(IndicatorKind::Sma, false).with_period(20),
        );
        toggles.insert(
            "bollinger".to_string(),
            IndicatorToggle::new(IndicatorKind::Bollinger, false)
                .with_period(20)
                .with_std_dev(DEFAULT_STD_DEV_MULTIPLIER),
        );
        toggles.insert("vwap".to_string(), IndicatorToggle::new(IndicatorKind::Vwap, true));
        toggles.insert("cpr".to_string(), IndicatorToggle::new(IndicatorKind::Cpr, false));
        Self { toggles }
    }
}

impl IndicatorConfig {
    /// Config with no indicators at all
    pub fn empty() -> Self {
        Self {
            toggles: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&IndicatorToggle> {
        self.toggles.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, toggle: IndicatorToggle) {
        self.toggles.insert(name.into(), toggle);
    }

    /// Switch a toggle on or off; false when the name is unknown
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.toggles.get_mut(name) {
            Some(toggle) => {
                toggle.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Enabled toggles in name order
    pub fn enabled(&self) -> impl Iterator<Item = (&String, &IndicatorToggle)> {
        self.toggles.iter().filter(|(_, toggle)| toggle.enabled)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ==================== Indicators ====================

/// Overlay line published by an indicator
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorLine {
    /// Overlay series id on the renderer
    pub id: String,
    pub style: OverlayStyle,
}

impl IndicatorLine {
    fn new(id: impl Into<String>, title: impl Into<String>, color: Color, style: LineStyle, width: f32) -> Self {
        Self {
            id: id.into(),
            style: OverlayStyle {
                title: title.into(),
                color,
                style,
                width,
            },
        }
    }
}

/// How an incremental update relates to the previous calculation
enum Trailing {
    /// Same length, last point changed
    Replace,
    /// One bar pushed
    Push,
    /// Anything else needs a full calculation
    Full,
}

fn trailing(previous_len: usize, bars: &[BarData]) -> Trailing {
    if bars.is_empty() || previous_len == 0 {
        Trailing::Full
    } else if bars.len() == previous_len {
        Trailing::Replace
    } else if bars.len() == previous_len + 1 {
        Trailing::Push
    } else {
        Trailing::Full
    }
}

fn set_last(values: &mut Vec<Option<f64>>, mode: &Trailing, value: Option<f64>) {
    match mode {
        Trailing::Push => values.push(value),
        _ => {
            if let Some(last) = values.last_mut() {
                *last = value;
            }
        }
    }
}

fn closes(bars: &[BarData]) -> Vec<f64> {
    bars.iter().map(|bar| bar.close_price).collect()
}

/// Base trait for all indicators
pub trait Indicator: Send + Sync {
    /// Toggle name the indicator was built from
    fn name(&self) -> &str;

    /// Calculate indicator values for given bar data
    fn calculate(&mut self, bars: &[BarData]);

    /// Recompute only the trailing point after the last bar changed or one
    /// bar was pushed. Falls back to a full calculation otherwise.
    fn update_last(&mut self, bars: &[BarData]);

    /// Get the number of result series
    fn series_count(&self) -> usize;

    /// Values of one series
    fn series(&self, series_index: usize) -> &[Option<f64>];

    /// Get line configuration for a series
    fn get_line_config(&self, series_index: usize) -> Option<&IndicatorLine>;

    /// Get values for a specific bar index and series
    fn get_value(&self, bar_index: usize, series_index: usize) -> Option<f64> {
        self.series(series_index).get(bar_index).copied().flatten()
    }

    /// Get Y-axis range for this indicator
    fn get_y_range(&self, min_ix: usize, max_ix: usize) -> Option<(f64, f64)> {
        if min_ix > max_ix {
            return None;
        }

        let mut range: Option<(f64, f64)> = None;
        for series_index in 0..self.series_count() {
            let series = self.series(series_index);
            if min_ix >= series.len() {
                continue;
            }
            let end_ix = max_ix.min(series.len() - 1);
            for value in series[min_ix..=end_ix].iter().flatten() {
                range = Some(match range {
                    Some((low, high)) => (low.min(*value), high.max(*value)),
                    None => (*value, *value),
                });
            }
        }
        range
    }
}

/// Simple Moving Average
pub struct MA {
    name: String,
    period: usize,
    values: Vec<Option<f64>>,
    config: IndicatorLine,
}

impl MA {
    pub fn new(name: &str, period: usize, color: Color) -> Self {
        Self {
            name: name.to_string(),
            period,
            values: Vec::new(),
            config: IndicatorLine::new(name, format!("SMA {}", period), color, LineStyle::Solid, LINE_WIDTH),
        }
    }
}

impl Indicator for MA {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate(&mut self, bars: &[BarData]) {
        self.values = sma_series(&closes(bars), self.period);
    }

    fn update_last(&mut self, bars: &[BarData]) {
        let mode = trailing(self.values.len(), bars);
        if let Trailing::Full = mode {
            return self.calculate(bars);
        }

        let n = bars.len();
        let value = (self.period > 0 && n >= self.period).then(|| {
            bars[n - self.period..].iter().map(|b| b.close_price).sum::<f64>() / self.period as f64
        });
        set_last(&mut self.values, &mode, value);
    }

    fn series_count(&self) -> usize {
        1
    }

    fn series(&self, _series_index: usize) -> &[Option<f64>] {
        &self.values
    }

    fn get_line_config(&self, _series_index: usize) -> Option<&IndicatorLine> {
        Some(&self.config)
    }
}

/// Exponential Moving Average
pub struct EMA {
    name: String,
    period: usize,
    values: Vec<Option<f64>>,
    config: IndicatorLine,
}

impl EMA {
    pub fn new(name: &str, period: usize, color: Color) -> Self {
        Self {
            name: name.to_string(),
            period,
            values: Vec::new(),
            config: IndicatorLine::new(name, format!("EMA {}", period), color, LineStyle::Solid, LINE_WIDTH),
        }
    }
}

impl Indicator for EMA {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate(&mut self, bars: &[BarData]) {
        self.values = ema_series(&closes(bars), self.period);
    }

    fn update_last(&mut self, bars: &[BarData]) {
        let mode = trailing(self.values.len(), bars);
        if let Trailing::Full = mode {
            return self.calculate(bars);
        }

        let n = bars.len();
        let last_ix = n - 1;
        let value = if self.period == 0 || last_ix + 1 < self.period {
            None
        } else if last_ix + 1 == self.period {
            Some(bars.iter().map(|b| b.close_price).sum::<f64>() / self.period as f64)
        } else {
            let multiplier = ema_multiplier(self.period);
            self.values
                .get(last_ix - 1)
                .copied()
                .flatten()
                .map(|previous| bars[last_ix].close_price * multiplier + previous * (1.0 - multiplier))
        };
        set_last(&mut self.values, &mode, value);
    }

    fn series_count(&self) -> usize {
        1
    }

    fn series(&self, _series_index: usize) -> &[Option<f64>] {
        &self.values
    }

    fn get_line_config(&self, _series_index: usize) -> Option<&IndicatorLine> {
        Some(&self.config)
    }
}

/// Bollinger Bands
pub struct BOLL {
    name: String,
    period: usize,
    std_dev: f64,
    upper: Vec<Option<f64>>,
    middle: Vec<Option<f64>>,
    lower: Vec<Option<f64>>,
    configs: [IndicatorLine; 3],
}

impl BOLL {
    pub fn new(name: &str, period: usize, std_dev: f64) -> Self {
        Self {
            name: name.to_string(),
            period,
            std_dev,
            upper: Vec::new(),
            middle: Vec::new(),
            lower: Vec::new(),
            configs: [
                IndicatorLine::new(
                    format!("{}:upper", name),
                    format!("BOLL {} upper", period),
                    BOLL_BAND_COLOR,
                    LineStyle::Dashed,
                    BAND_WIDTH,
                ),
                IndicatorLine::new(
                    format!("{}:middle", name),
                    format!("BOLL {}", period),
                    BOLL_MIDDLE_COLOR,
                    LineStyle::Solid,
                    LINE_WIDTH,
                ),
                IndicatorLine::new(
                    format!("{}:lower", name),
                    format!("BOLL {} lower", period),
                    BOLL_BAND_COLOR,
                    LineStyle::Dashed,
                    BAND_WIDTH,
                ),
            ],
        }
    }
}

impl Indicator for BOLL {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate(&mut self, bars: &[BarData]) {
        let (upper, middle, lower) = bollinger_series(&closes(bars), self.period, self.std_dev);
        self.upper = upper;
        self.middle = middle;
        self.lower = lower;
    }

    fn update_last(&mut self, bars: &[BarData]) {
        let mode = trailing(self.middle.len(), bars);
        if let Trailing::Full = mode {
            return self.calculate(bars);
        }

        let n = bars.len();
        let point = (self.period > 0 && n >= self.period).then(|| {
            let window: Vec<f64> = bars[n - self.period..].iter().map(|b| b.close_price).collect();
            bollinger_point(&window, self.std_dev)
        });

        set_last(&mut self.upper, &mode, point.map(|p| p.0));
        set_last(&mut self.middle, &mode, point.map(|p| p.1));
        set_last(&mut self.lower, &mode, point.map(|p| p.2));
    }

    fn series_count(&self) -> usize {
        3
    }

    fn series(&self, series_index: usize) -> &[Option<f64>] {
        match series_index {
            0 => &self.upper,
            1 => &self.middle,
            2 => &self.lower,
            _ => &[],
        }
    }

    fn get_line_config(&self, series_index: usize) -> Option<&IndicatorLine> {
        self.configs.get(series_index)
    }
}

/// Session Volume Weighted Average Price
pub struct VWAP {
    name: String,
    values: Vec<Option<f64>>,
    /// Running (price * volume, volume) of the current day up to each bar
    cumulative: Vec<(f64, f64)>,
    config: IndicatorLine,
}

impl VWAP {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
            cumulative: Vec::new(),
            config: IndicatorLine::new(name, "VWAP", VWAP_COLOR, LineStyle::Solid, LINE_WIDTH),
        }
    }

    fn accumulate(&self, bars: &[BarData], ix: usize) -> (f64, f64) {
        let bar = &bars[ix];
        let same_day = ix > 0
            && local_date(bars[ix - 1].datetime, bars[ix - 1].exchange)
                == local_date(bar.datetime, bar.exchange);
        let (pv, v) = if same_day {
            self.cumulative.get(ix - 1).copied().unwrap_or((0.0, 0.0))
        } else {
            (0.0, 0.0)
        };
        (pv + bar.typical_price() * bar.volume, v + bar.volume)
    }
}

impl Indicator for VWAP {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate(&mut self, bars: &[BarData]) {
        self.cumulative.clear();
        for ix in 0..bars.len() {
            let sums = self.accumulate(bars, ix);
            self.cumulative.push(sums);
        }
        self.values = vwap_series(bars);
    }

    fn update_last(&mut self, bars: &[BarData]) {
        let mode = trailing(self.values.len(), bars);
        if let Trailing::Full = mode {
            return self.calculate(bars);
        }

        let last_ix = bars.len() - 1;
        let (pv, v) = self.accumulate(bars, last_ix);
        match mode {
            Trailing::Push => self.cumulative.push((pv, v)),
            _ => {
                if let Some(last) = self.cumulative.last_mut() {
                    *last = (pv, v);
                }
            }
        }
        let value = vwap_value(pv, v, bars[last_ix].typical_price());
        set_last(&mut self.values, &mode, Some(value));
    }

    fn series_count(&self) -> usize {
        1
    }

    fn series(&self, _series_index: usize) -> &[Option<f64>] {
        &self.values
    }

    fn get_line_config(&self, _series_index: usize) -> Option<&IndicatorLine> {
        Some(&self.config)
    }
}

/// Central Pivot Range over the last loaded day
pub struct CPR {
    name: String,
    /// Day the levels apply to and the levels themselves
    levels: Option<(NaiveDate, CprLevels)>,
    values: [Vec<Option<f64>>; 7],
    configs: Vec<IndicatorLine>,
}

impl CPR {
    pub fn new(name: &str) -> Self {
        let lines = [
            ("pivot", "Pivot", PIVOT_COLOR, LineStyle::Solid),
            ("bc", "BC", PIVOT_COLOR, LineStyle::Dashed),
            ("tc", "TC", PIVOT_COLOR, LineStyle::Dashed),
            ("r1", "R1", RESISTANCE_COLOR, LineStyle::Dotted),
            ("s1", "S1", SUPPORT_COLOR, LineStyle::Dotted),
            ("r2", "R2", RESISTANCE_COLOR, LineStyle::Dotted),
            ("s2", "S2", SUPPORT_COLOR, LineStyle::Dotted),
        ];
        Self {
            name: name.to_string(),
            levels: None,
            values: Default::default(),
            configs: lines
                .into_iter()
                .map(|(suffix, title, color, style)| {
                    IndicatorLine::new(format!("{}:{}", name, suffix), title, color, style, BAND_WIDTH)
                })
                .collect(),
        }
    }

    /// Levels of the last calculation
    pub fn levels(&self) -> Option<CprLevels> {
        self.levels.map(|(_, levels)| levels)
    }

    fn point(&self, bar: &BarData) -> [Option<f64>; 7] {
        match self.levels {
            Some((day, levels)) if local_date(bar.datetime, bar.exchange) == day => {
                levels.values().map(Some)
            }
            _ => [None; 7],
        }
    }
}

impl Indicator for CPR {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate(&mut self, bars: &[BarData]) {
        self.levels = cpr_levels(bars);
        for series in self.values.iter_mut() {
            series.clear();
        }
        for bar in bars {
            let point = self.point(bar);
            for (series, value) in self.values.iter_mut().zip(point) {
                series.push(value);
            }
        }
    }

    fn update_last(&mut self, bars: &[BarData]) {
        let mode = trailing(self.values[0].len(), bars);
        let Some(last) = bars.last() else {
            return self.calculate(bars);
        };

        // A bar opening a new day moves the levels
        let same_day = self
            .levels
            .map(|(day, _)| day == local_date(last.datetime, last.exchange))
            .unwrap_or(false);
        if matches!(mode, Trailing::Full) || !same_day {
            return self.calculate(bars);
        }

        let point = self.point(last);
        for (series, value) in self.values.iter_mut().zip(point) {
            set_last(series, &mode, value);
        }
    }

    fn series_count(&self) -> usize {
        7
    }

    fn series(&self, series_index: usize) -> &[Option<f64>] {
        self.values.get(series_index).map(Vec::as_slice).unwrap_or(&[])
    }

    fn get_line_config(&self, series_index: usize) -> Option<&IndicatorLine> {
        self.configs.get(series_index)
    }
}

// ==================== Indicator set ====================

/// The enabled indicators of one chart, kept in step with its bars
pub struct IndicatorSet {
    config: IndicatorConfig,
    indicators: Vec<Box<dyn Indicator>>,
}

impl IndicatorSet {
    pub fn new(config: IndicatorConfig) -> Self {
        let indicators = config
            .enabled()
            .map(|(name, toggle)| toggle.build(name))
            .collect();
        Self { config, indicators }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Full recalculation over the whole sequence
    pub fn recalculate(&mut self, bars: &[BarData]) {
        for indicator in self.indicators.iter_mut() {
            indicator.calculate(bars);
        }
    }

    /// Trailing-point update after a live tick
    pub fn update_last(&mut self, bars: &[BarData]) {
        for indicator in self.indicators.iter_mut() {
            indicator.update_last(bars);
        }
    }

    pub fn indicators(&self) -> &[Box<dyn Indicator>] {
        &self.indicators
    }

    pub fn get(&self, name: &str) -> Option<&dyn Indicator> {
        self.indicators
            .iter()
            .find(|indicator| indicator.name() == name)
            .map(|indicator| indicator.as_ref())
    }

    /// Every overlay line with its series, in publishing order
    pub fn lines(&self) -> Vec<(&IndicatorLine, &[Option<f64>])> {
        let mut lines = Vec::new();
        for indicator in &self.indicators {
            for series_index in 0..indicator.series_count() {
                if let Some(config) = indicator.get_line_config(series_index) {
                    lines.push((config, indicator.series(series_index)));
                }
            }
        }
        lines
    }

    /// Overlay ids currently published
    pub fn overlay_ids(&self) -> Vec<String> {
        self.lines().into_iter().map(|(line, _)| line.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::fixtures::{daily_bars, intraday_bars, make_bar, minute_key, session_minute};
    use crate::trader::constant::{Exchange, Interval};
    use crate::trader::object::ChartKey;
    use chrono::Duration;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn assert_series_eq(left: &[Option<f64>], right: &[Option<f64>]) {
        assert_eq!(left.len(), right.len());
        for (l, r) in left.iter().zip(right) {
            match (l, r) {
                (Some(a), Some(b)) => assert!(approx(*a, *b), "{} != {}", a, b),
                (None, None) => {}
                _ => panic!("{:?} != {:?}", l, r),
            }
        }
    }

    #[test]
    fn test_sma_on_twenty_daily_bars() {
        let key = ChartKey::new("SYM", Exchange::Nse, Interval::Daily);
        let bars = daily_bars(&key, 20);
        let mut ma = MA::new("sma5", 5, SMA_COLOR);
        ma.calculate(&bars);

        let values = ma.series(0);
        assert_eq!(values.len(), 20);
        assert_eq!(values.iter().take_while(|v| v.is_none()).count(), 4);
        // closes 100..=104 then 101..=105
        assert!(approx(values[4].unwrap(), 102.0));
        assert!(approx(values[5].unwrap(), 103.0));
        assert!(approx(values[19].unwrap(), 117.0));
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let closes = [10.0, 11.0, 12.0, 13.0, 14.0];
        let values = ema_series(&closes, 3);
        assert_eq!(values[..2], [None, None]);
        assert!(approx(values[2].unwrap(), 11.0));
        // k = 0.5
        assert!(approx(values[3].unwrap(), 12.0));
        assert!(approx(values[4].unwrap(), 13.0));

        assert!(ema_series(&closes, 6).iter().all(Option::is_none));
        assert!(sma_series(&closes, 0).iter().all(Option::is_none));
    }

    #[test]
    fn test_bollinger_population_std_dev() {
        let closes = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (upper, middle, lower) = bollinger_series(&closes, 8, 2.0);
        assert!(upper[6].is_none());
        assert!(approx(middle[7].unwrap(), 5.0));
        assert!(approx(upper[7].unwrap(), 9.0));
        assert!(approx(lower[7].unwrap(), 1.0));
    }

    #[test]
    fn test_vwap_resets_each_day() {
        let key = minute_key();
        let bars = intraday_bars(&key, 2, 5);
        let values = vwap_series(&bars);

        assert_eq!(values.len(), 10);
        assert!(approx(values[0].unwrap(), bars[0].typical_price()));
        assert!(approx(values[5].unwrap(), bars[5].typical_price()));

        let expected = bars[..2].iter().map(|b| b.typical_price()).sum::<f64>() / 2.0;
        assert!(approx(values[1].unwrap(), expected));
    }

    #[test]
    fn test_cpr_formulas() {
        let levels = CprLevels::from_hlc(110.0, 90.0, 105.0);
        assert!(approx(levels.pivot, 305.0 / 3.0));
        assert!(approx(levels.bottom_center, 100.0));
        assert!(approx(levels.top_center, 2.0 * levels.pivot - 100.0));
        assert!(approx(levels.r1, 2.0 * levels.pivot - 90.0));
        assert!(approx(levels.s1, 2.0 * levels.pivot - 110.0));
        assert!(approx(levels.r2, levels.pivot + 20.0));
        assert!(approx(levels.s2, levels.pivot - 20.0));
    }

    #[test]
    fn test_cpr_uses_previous_day_and_fills_last_day() {
        let key = minute_key();
        let bars = intraday_bars(&key, 3, 4);
        let mut cpr = CPR::new("cpr");
        cpr.calculate(&bars);

        // Day two: closes 110..=113, high = close + 1, low = close - 1
        let expected = CprLevels::from_hlc(114.0, 109.0, 113.0);
        assert_eq!(cpr.levels(), Some(expected));

        for series_index in 0..7 {
            let series = cpr.series(series_index);
            assert_eq!(series.len(), 12);
            assert!(series[..8].iter().all(Option::is_none));
            assert!(series[8..].iter().all(Option::is_some));
        }
        assert!(approx(cpr.get_value(11, 0).unwrap(), expected.pivot));
    }

    #[test]
    fn test_cpr_needs_two_days() {
        let key = minute_key();
        let bars = intraday_bars(&key, 1, 30);
        let mut cpr = CPR::new("cpr");
        cpr.calculate(&bars);

        assert!(cpr.levels().is_none());
        for series_index in 0..7 {
            assert_eq!(cpr.series(series_index).len(), 30);
            assert!(cpr.series(series_index).iter().all(Option::is_none));
        }
    }

    #[test]
    fn test_update_last_matches_full_calculation() {
        let key = minute_key();
        let mut bars = intraday_bars(&key, 2, 30);
        let mut config = IndicatorConfig::default();
        for name in ["ema60", "sma20", "bollinger", "cpr"] {
            config.set_enabled(name, true);
        }
        config.insert("ema3", IndicatorToggle::new(IndicatorKind::Ema, true).with_period(3));

        let mut incremental = IndicatorSet::new(config.clone());
        incremental.recalculate(&bars);

        // Tick on the last bar
        if let Some(last) = bars.last_mut() {
            last.close_price += 3.0;
            last.high_price += 3.0;
            last.volume += 500.0;
        }
        incremental.update_last(&bars);

        // A new bar, then a bar opening the next day
        let next = bars[bars.len() - 1].datetime + Duration::minutes(1);
        bars.push(make_bar(&key, next, 140.0));
        incremental.update_last(&bars);
        bars.push(make_bar(&key, session_minute(0) + Duration::days(2), 150.0));
        incremental.update_last(&bars);

        let mut full = IndicatorSet::new(config);
        full.recalculate(&bars);

        let left = incremental.lines();
        let right = full.lines();
        assert_eq!(left.len(), right.len());
        for ((line_a, a), (line_b, b)) in left.iter().zip(right.iter()) {
            assert_eq!(line_a.id, line_b.id);
            assert_eq!(a.len(), bars.len());
            assert_series_eq(a, b);
        }
    }

    #[test]
    fn test_indicator_config_defaults_and_json() {
        let mut config = IndicatorConfig::default();
        let enabled: Vec<&String> = config.enabled().map(|(name, _)| name).collect();
        assert_eq!(enabled, ["ema20", "vwap"]);

        assert!(config.set_enabled("bollinger", true));
        assert!(!config.set_enabled("macd", true));

        let restored = IndicatorConfig::from_json(&config.to_json()).unwrap();
        assert_eq!(restored, config);
        assert_eq!(restored.get("bollinger").and_then(|t| t.std_dev_multiplier), Some(2.0));
    }

    #[test]
    fn test_overlay_ids_and_y_range() {
        let key = ChartKey::new("SYM", Exchange::Nse, Interval::Daily);
        let bars = daily_bars(&key, 30);
        let mut config = IndicatorConfig::empty();
        config.insert("bollinger", IndicatorToggle::new(IndicatorKind::Bollinger, true));
        config.insert("sma5", IndicatorToggle::new(IndicatorKind::Sma, true).with_period(5));

        let mut set = IndicatorSet::new(config);
        set.recalculate(&bars);

        assert_eq!(
            set.overlay_ids(),
            ["bollinger:upper", "bollinger:middle", "bollinger:lower", "sma5"]
        );
        let sma = set.get("sma5").unwrap();
        assert_eq!(sma.get_y_range(0, 3), None);
        assert_eq!(sma.get_y_range(4, 5), Some((102.0, 103.0)));
    }
}
