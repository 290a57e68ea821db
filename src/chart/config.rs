//! Engine knobs and persisted chart preferences.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::warn;

use super::base::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_REPLAY_BASE_MS, DEFAULT_REPLAY_FLOOR_MS, DEFAULT_TRIGGER_BARS,
};
use super::indicator::IndicatorConfig;
use crate::trader::constant::Interval;
use crate::trader::object::DateRange;
use crate::trader::setting::{SettingValue, Settings};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Default history page width in calendar days
pub fn default_lookback_days(interval: Interval) -> i64 {
    match interval {
        Interval::Minute => 5,
        Interval::Minute3 => 10,
        Interval::Minute5 => 15,
        Interval::Minute10 => 20,
        Interval::Minute15 => 30,
        Interval::Minute30 => 60,
        Interval::Hour => 90,
        Interval::Daily => 365,
    }
}

/// Knobs read once when the engine starts
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub use_snapshot_ticks: bool,
    pub trigger_bars: usize,
    pub lookback_days: HashMap<Interval, i64>,
    pub replay_base_interval: Duration,
    pub replay_floor: Duration,
    pub admin_resync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            use_snapshot_ticks: true,
            trigger_bars: DEFAULT_TRIGGER_BARS,
            lookback_days: Interval::all()
                .into_iter()
                .map(|interval| (interval, default_lookback_days(interval)))
                .collect(),
            replay_base_interval: Duration::from_millis(DEFAULT_REPLAY_BASE_MS),
            replay_floor: Duration::from_millis(DEFAULT_REPLAY_FLOOR_MS),
            admin_resync: false,
        }
    }
}

impl EngineConfig {
    /// Read `live.*`, `history.*`, `replay.*` and `datafeed.admin_resync`
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            settings
                .get_int(key)
                .filter(|ms| *ms > 0)
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(default)
        };

        let lookback_days = Interval::all()
            .into_iter()
            .map(|interval| {
                let days = settings
                    .get_int(&format!("history.lookback_days.{}", interval.value()))
                    .filter(|days| *days > 0)
                    .unwrap_or_else(|| default_lookback_days(interval));
                (interval, days)
            })
            .collect();

        Self {
            poll_interval: millis("live.poll_interval_ms", defaults.poll_interval),
            use_snapshot_ticks: settings
                .get_bool("live.use_snapshot_ticks")
                .unwrap_or(defaults.use_snapshot_ticks),
            trigger_bars: settings
                .get_int("history.trigger_bars")
                .filter(|bars| *bars >= 0)
                .map(|bars| bars as usize)
                .unwrap_or(defaults.trigger_bars),
            lookback_days,
            replay_base_interval: millis("replay.base_interval_ms", defaults.replay_base_interval),
            replay_floor: millis("replay.floor_ms", defaults.replay_floor),
            admin_resync: settings
                .get_bool("datafeed.admin_resync")
                .unwrap_or(defaults.admin_resync),
        }
    }

    pub fn lookback_days(&self, interval: Interval) -> i64 {
        self.lookback_days
            .get(&interval)
            .copied()
            .unwrap_or_else(|| default_lookback_days(interval))
    }
}

/// Chart selection remembered for the session: indicators, interval and
/// date range. Computed series are never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPreferences {
    pub indicators: IndicatorConfig,
    pub interval: Interval,
    pub range: Option<DateRange>,
}

impl Default for ChartPreferences {
    fn default() -> Self {
        Self {
            indicators: IndicatorConfig::default(),
            interval: Interval::Minute5,
            range: None,
        }
    }
}

impl ChartPreferences {
    /// Read from settings, falling back per field on missing or bad values
    pub fn load(settings: &Settings) -> Self {
        let defaults = Self::default();

        let indicators = match settings.get_string("chart.indicators") {
            Some(text) => IndicatorConfig::from_json(&text).unwrap_or_else(|e| {
                warn!("ignoring stored indicator selection: {}", e);
                defaults.indicators.clone()
            }),
            None => defaults.indicators.clone(),
        };

        let interval = settings
            .get_string("chart.interval")
            .and_then(|code| code.parse().ok())
            .unwrap_or(defaults.interval);

        let date = |key: &str| {
            settings
                .get_string(key)
                .and_then(|text| NaiveDate::parse_from_str(&text, DATE_FORMAT).ok())
        };
        let range = match (date("chart.from_date"), date("chart.to_date")) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)),
            _ => None,
        };

        Self {
            indicators,
            interval,
            range,
        }
    }

    pub fn save(&self, settings: &Settings) {
        settings.set("chart.indicators", SettingValue::String(self.indicators.to_json()));
        settings.set(
            "chart.interval",
            SettingValue::String(self.interval.value().to_string()),
        );
        match &self.range {
            Some(range) => {
                settings.set(
                    "chart.from_date",
                    SettingValue::String(range.start.format(DATE_FORMAT).to_string()),
                );
                settings.set(
                    "chart.to_date",
                    SettingValue::String(range.end.format(DATE_FORMAT).to_string()),
                );
            }
            None => {
                settings.remove("chart.from_date");
                settings.remove("chart.to_date");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_from_settings() {
        let settings = Settings::in_memory();
        let config = EngineConfig::from_settings(&settings);
        assert_eq!(config.poll_interval, Duration::from_millis(5_000));
        assert_eq!(config.trigger_bars, 10);
        assert_eq!(config.lookback_days(Interval::Minute), 5);
        assert_eq!(config.lookback_days(Interval::Daily), 365);
        assert!(!config.admin_resync);

        settings.set("live.poll_interval_ms", SettingValue::Int(250));
        settings.set("history.lookback_days.5m", SettingValue::Int(3));
        settings.set("replay.floor_ms", SettingValue::Int(-1));
        let config = EngineConfig::from_settings(&settings);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.lookback_days(Interval::Minute5), 3);
        assert_eq!(config.replay_floor, Duration::from_millis(50));
    }

    #[test]
    fn test_preferences_round_trip() {
        let settings = Settings::in_memory();
        assert_eq!(ChartPreferences::load(&settings), ChartPreferences::default());

        let mut preferences = ChartPreferences::default();
        preferences.indicators.set_enabled("cpr", true);
        preferences.interval = Interval::Minute15;
        preferences.range = Some(DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
        ));
        preferences.save(&settings);

        assert_eq!(ChartPreferences::load(&settings), preferences);
    }

    #[test]
    fn test_bad_stored_values_fall_back() {
        let settings = Settings::in_memory();
        settings.set("chart.indicators", SettingValue::String("not json".to_string()));
        settings.set("chart.interval", SettingValue::String("7m".to_string()));

        let preferences = ChartPreferences::load(&settings);
        assert_eq!(preferences.indicators, IndicatorConfig::default());
        assert_eq!(preferences.interval, Interval::Minute5);
    }
}
