//! General constant enums used in the charting engine.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Indian Standard Time offset in seconds (UTC+05:30).
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Exchange the instrument is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// National Stock Exchange
    Nse,
    /// Bombay Stock Exchange
    Bse,
    /// NSE futures & options
    Nfo,
    /// NSE currency derivatives
    Cds,
    /// BSE futures & options
    Bfo,
    /// Multi Commodity Exchange
    Mcx,
    /// BSE currency derivatives
    Bcd,
    /// Round-the-clock venue quoted in UTC
    Global,
}

impl Exchange {
    /// Get exchange value string
    pub fn value(&self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
            Exchange::Nfo => "NFO",
            Exchange::Cds => "CDS",
            Exchange::Bfo => "BFO",
            Exchange::Mcx => "MCX",
            Exchange::Bcd => "BCD",
            Exchange::Global => "GLOBAL",
        }
    }

    /// Offset of the exchange's local clock from UTC.
    ///
    /// Calendar-day boundaries (session VWAP, pivot levels, "today" for live
    /// polling) are taken in this local time.
    pub fn utc_offset(&self) -> FixedOffset {
        let secs = match self {
            Exchange::Global => 0,
            _ => IST_OFFSET_SECS,
        };
        FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix())
    }

    /// Local time of the first intraday bucket of a session.
    pub fn session_open(&self) -> NaiveTime {
        let (hour, minute) = match self {
            Exchange::Nse | Exchange::Bse | Exchange::Nfo | Exchange::Bfo => (9, 15),
            Exchange::Cds | Exchange::Bcd | Exchange::Mcx => (9, 0),
            Exchange::Global => (0, 0),
        };
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Get all exchanges for selection lists
    pub fn all() -> Vec<Exchange> {
        vec![
            Exchange::Nse,
            Exchange::Bse,
            Exchange::Nfo,
            Exchange::Cds,
            Exchange::Bfo,
            Exchange::Mcx,
            Exchange::Bcd,
            Exchange::Global,
        ]
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exchange::all()
            .into_iter()
            .find(|exchange| exchange.value().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown exchange: {}", s))
    }
}

/// Interval of bar data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    /// 1 minute
    #[serde(rename = "1m")]
    Minute,
    /// 3 minutes
    #[serde(rename = "3m")]
    Minute3,
    /// 5 minutes
    #[serde(rename = "5m")]
    Minute5,
    /// 10 minutes
    #[serde(rename = "10m")]
    Minute10,
    /// 15 minutes
    #[serde(rename = "15m")]
    Minute15,
    /// 30 minutes
    #[serde(rename = "30m")]
    Minute30,
    /// 1 hour
    #[serde(rename = "1h")]
    Hour,
    /// Daily
    #[serde(rename = "1d")]
    Daily,
}

impl Interval {
    /// Interval code used by the market data service
    pub fn value(&self) -> &'static str {
        match self {
            Interval::Minute => "1m",
            Interval::Minute3 => "3m",
            Interval::Minute5 => "5m",
            Interval::Minute10 => "10m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour => "1h",
            Interval::Daily => "1d",
        }
    }

    /// Interval name understood by the upstream broker
    pub fn broker_name(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::Minute3 => "3minute",
            Interval::Minute5 => "5minute",
            Interval::Minute10 => "10minute",
            Interval::Minute15 => "15minute",
            Interval::Minute30 => "30minute",
            Interval::Hour => "60minute",
            Interval::Daily => "day",
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Interval::Minute => "1 Minute",
            Interval::Minute3 => "3 Minutes",
            Interval::Minute5 => "5 Minutes",
            Interval::Minute10 => "10 Minutes",
            Interval::Minute15 => "15 Minutes",
            Interval::Minute30 => "30 Minutes",
            Interval::Hour => "1 Hour",
            Interval::Daily => "1 Day",
        }
    }

    /// Bucket length in minutes for intraday intervals
    pub fn minutes(&self) -> Option<i64> {
        match self {
            Interval::Minute => Some(1),
            Interval::Minute3 => Some(3),
            Interval::Minute5 => Some(5),
            Interval::Minute10 => Some(10),
            Interval::Minute15 => Some(15),
            Interval::Minute30 => Some(30),
            Interval::Hour => Some(60),
            Interval::Daily => None,
        }
    }

    /// Whether bars of this interval are shorter than a session
    pub fn is_intraday(&self) -> bool {
        self.minutes().is_some()
    }

    /// Bucket length
    pub fn duration(&self) -> Duration {
        match self.minutes() {
            Some(minutes) => Duration::minutes(minutes),
            None => Duration::days(1),
        }
    }

    /// Get all intervals for selection lists
    pub fn all() -> Vec<Interval> {
        vec![
            Interval::Minute,
            Interval::Minute3,
            Interval::Minute5,
            Interval::Minute10,
            Interval::Minute15,
            Interval::Minute30,
            Interval::Hour,
            Interval::Daily,
        ]
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Interval::all()
            .into_iter()
            .find(|interval| interval.value() == s || interval.broker_name() == s)
            .ok_or_else(|| format!("unknown interval: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_value() {
        assert_eq!(Exchange::Nse.value(), "NSE");
        assert_eq!(Exchange::Global.to_string(), "GLOBAL");
        assert_eq!("nse".parse::<Exchange>(), Ok(Exchange::Nse));
        assert!("LSE".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_exchange_clock() {
        assert_eq!(Exchange::Nse.utc_offset().local_minus_utc(), 19800);
        assert_eq!(Exchange::Global.utc_offset().local_minus_utc(), 0);
        assert_eq!(
            Exchange::Nse.session_open(),
            NaiveTime::from_hms_opt(9, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_interval_value() {
        assert_eq!(Interval::Minute.value(), "1m");
        assert_eq!(Interval::Hour.broker_name(), "60minute");
        assert_eq!("15m".parse::<Interval>(), Ok(Interval::Minute15));
        assert_eq!("day".parse::<Interval>(), Ok(Interval::Daily));
        assert!(Interval::Minute5.is_intraday());
        assert!(!Interval::Daily.is_intraday());
        assert_eq!(Interval::Daily.duration(), Duration::days(1));
    }

    #[test]
    fn test_interval_serde_uses_codes() {
        let json = serde_json::to_string(&Interval::Minute30).unwrap();
        assert_eq!(json, "\"30m\"");
        let back: Interval = serde_json::from_str("\"1d\"").unwrap();
        assert_eq!(back, Interval::Daily);
    }
}
