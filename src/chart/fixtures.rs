//! Bar builders shared by the chart tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::trader::constant::{Exchange, Interval};
use crate::trader::object::{BarData, ChartKey};

pub fn minute_key() -> ChartKey {
    ChartKey::new("SBIN", Exchange::Nse, Interval::Minute)
}

/// NSE session open on 2024-01-02 plus `minutes`
pub fn session_minute(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 3, 45, 0).unwrap() + Duration::minutes(minutes)
}

/// Flat-ish bar closing at `close`
pub fn make_bar(key: &ChartKey, datetime: DateTime<Utc>, close: f64) -> BarData {
    let mut bar = BarData::new(key.symbol.clone(), key.exchange, key.interval, datetime);
    bar.open_price = close;
    bar.high_price = close + 1.0;
    bar.low_price = close - 1.0;
    bar.close_price = close;
    bar.volume = 1000.0;
    bar
}

/// `count` consecutive daily bars from 2024-01-01 (IST midnight), closes 100, 101, ...
pub fn daily_bars(key: &ChartKey, count: usize) -> Vec<BarData> {
    let start = Utc.with_ymd_and_hms(2023, 12, 31, 18, 30, 0).unwrap();
    (0..count)
        .map(|i| {
            let close = 100.0 + i as f64;
            let mut bar = make_bar(key, start + Duration::days(i as i64), close);
            bar.open_price = close - 0.5;
            bar.high_price = close + 2.0;
            bar.low_price = close - 2.5;
            bar.volume = 1000.0 + 10.0 * i as f64;
            bar
        })
        .collect()
}

/// `per_day` one-minute bars from the session open of each of `days` days
pub fn intraday_bars(key: &ChartKey, days: usize, per_day: usize) -> Vec<BarData> {
    let mut bars = Vec::with_capacity(days * per_day);
    for day in 0..days {
        let open = session_minute(0) + Duration::days(day as i64);
        for i in 0..per_day {
            let close = 100.0 + (day * 10) as f64 + i as f64;
            bars.push(make_bar(key, open + Duration::minutes(i as i64), close));
        }
    }
    bars
}
