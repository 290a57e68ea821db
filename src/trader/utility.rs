//! General utility functions.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use super::constant::{Exchange, Interval};

/// Get trader directory
fn get_trader_dir(temp_name: &str) -> (PathBuf, PathBuf) {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let temp_path = cwd.join(temp_name);

    // If the folder exists in current working directory, use it
    if temp_path.exists() {
        return (cwd, temp_path);
    }

    // Otherwise use home path
    let home_path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let temp_path = home_path.join(temp_name);

    if !temp_path.exists() {
        let _ = fs::create_dir_all(&temp_path);
    }

    (home_path, temp_path)
}

/// Trader directory
pub static TRADER_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    let (trader_dir, _) = get_trader_dir(".chartengine");
    trader_dir
});

/// Temp directory
pub static TEMP_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    let (_, temp_dir) = get_trader_dir(".chartengine");
    temp_dir
});

/// Get path for temp file with filename
pub fn get_file_path(filename: &str) -> PathBuf {
    TEMP_DIR.join(filename)
}

/// Get path for temp folder with folder name
pub fn get_folder_path(folder_name: &str) -> PathBuf {
    let folder_path = TEMP_DIR.join(folder_name);
    if !folder_path.exists() {
        let _ = fs::create_dir_all(&folder_path);
    }
    folder_path
}

fn local_to_utc(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    (naive - Duration::seconds(offset.local_minus_utc() as i64)).and_utc()
}

/// Calendar day of `time` on the exchange's local clock
pub fn local_date(time: DateTime<Utc>, exchange: Exchange) -> NaiveDate {
    time.with_timezone(&exchange.utc_offset()).date_naive()
}

/// Today's date on the exchange's local clock
pub fn exchange_today(exchange: Exchange) -> NaiveDate {
    local_date(Utc::now(), exchange)
}

/// Start of the interval bucket containing `time`.
///
/// Intraday buckets are laid out from the session open of the local day, so
/// 30 minute bars on NSE start at 09:15, 09:45, ... Daily buckets start at
/// local midnight.
pub fn bucket_start(time: DateTime<Utc>, interval: Interval, exchange: Exchange) -> DateTime<Utc> {
    let offset = exchange.utc_offset();
    let local = time.with_timezone(&offset).naive_local();

    match interval.minutes() {
        Some(minutes) => {
            let open = local.date().and_time(exchange.session_open());
            let step = minutes * 60;
            let elapsed = (local - open).num_seconds();
            let floored = open + Duration::seconds(elapsed.div_euclid(step) * step);
            local_to_utc(floored, offset)
        }
        None => local_to_utc(local.date().and_time(NaiveTime::MIN), offset),
    }
}

/// Whether a bar open time sits on the interval grid.
///
/// Daily bars only need to fall on a whole minute since data sources differ
/// on which clock they stamp the session with.
pub fn is_aligned(time: DateTime<Utc>, interval: Interval, exchange: Exchange) -> bool {
    if interval.is_intraday() {
        bucket_start(time, interval, exchange) == time
    } else {
        time.second() == 0 && time.nanosecond() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        Exchange::Nse
            .utc_offset()
            .with_ymd_and_hms(y, m, d, hh, mm, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_bucket_start_anchors_on_session_open() {
        let t = ist(2024, 3, 4, 10, 2);
        assert_eq!(bucket_start(t, Interval::Minute30, Exchange::Nse), ist(2024, 3, 4, 9, 45));
        assert_eq!(bucket_start(t, Interval::Hour, Exchange::Nse), ist(2024, 3, 4, 9, 15));
        assert_eq!(bucket_start(t, Interval::Minute5, Exchange::Nse), ist(2024, 3, 4, 10, 0));
        assert_eq!(bucket_start(t, Interval::Daily, Exchange::Nse), ist(2024, 3, 4, 0, 0));
    }

    #[test]
    fn test_bucket_start_before_open_floors_backwards() {
        let t = ist(2024, 3, 4, 9, 10);
        assert_eq!(bucket_start(t, Interval::Minute15, Exchange::Nse), ist(2024, 3, 4, 9, 0));
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(ist(2024, 3, 4, 9, 45), Interval::Minute30, Exchange::Nse));
        assert!(!is_aligned(ist(2024, 3, 4, 10, 0), Interval::Minute30, Exchange::Nse));
        let daily = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        assert!(is_aligned(daily, Interval::Daily, Exchange::Nse));
        assert!(!is_aligned(daily + Duration::seconds(7), Interval::Daily, Exchange::Nse));
    }

    #[test]
    fn test_local_date_crosses_utc_midnight() {
        // 20:00 UTC is 01:30 IST on the next day
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 20, 0, 0).unwrap();
        assert_eq!(local_date(t, Exchange::Nse), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(local_date(t, Exchange::Global), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    }
}
