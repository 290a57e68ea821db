//! Datafeed module for connecting to the market data service.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::object::{BarData, HistoryRequest, OhlcvRecord};
use super::setting::Settings;
use super::utility::local_date;

/// Errors that can occur while talking to a datafeed
#[derive(Debug, Error)]
pub enum DatafeedError {
    /// No usable datafeed behind this handle
    #[error("datafeed is not configured: {0}")]
    NotConfigured(String),

    /// Network failure, timeout or undecodable body
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The configured base address is not a valid URL
    #[error("invalid datafeed url: {0}")]
    Url(#[from] url::ParseError),

    /// The source is temporarily unable to serve data
    #[error("datafeed unavailable: {0}")]
    Unavailable(String),
}

/// Abstract datafeed trait for connecting to different data sources
#[async_trait]
pub trait BaseDatafeed: Send + Sync {
    /// Initialize datafeed service connection
    async fn init(&self) -> Result<bool, DatafeedError> {
        Ok(false)
    }

    /// Query history bar data, ordered by time.
    ///
    /// An empty vector means the range holds no data and is not an error.
    async fn query_bar_history(&self, req: &HistoryRequest) -> Result<Vec<BarData>, DatafeedError>;

    /// Ask the service to pull fresh bars for the range from the upstream
    /// broker. Returns how many records were stored.
    async fn resync(&self, _req: &HistoryRequest) -> Result<usize, DatafeedError> {
        Err(DatafeedError::NotConfigured(
            "broker resync is not supported by this datafeed".to_string(),
        ))
    }
}

/// Empty datafeed implementation for when no datafeed is configured
pub struct EmptyDatafeed;

impl EmptyDatafeed {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmptyDatafeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseDatafeed for EmptyDatafeed {
    async fn init(&self) -> Result<bool, DatafeedError> {
        warn!("no datafeed configured, set datafeed.url in the settings file");
        Ok(false)
    }

    async fn query_bar_history(&self, _req: &HistoryRequest) -> Result<Vec<BarData>, DatafeedError> {
        Err(DatafeedError::NotConfigured(
            "bar history query failed: no datafeed configured".to_string(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct ResyncBody<'a> {
    symbol: &'a str,
    exchange: &'a str,
    from_date: String,
    to_date: String,
    interval: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResyncResponse {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    message: String,
}

/// Datafeed backed by the platform's REST market data service
pub struct RestDatafeed {
    client: Client,
    base: Url,
    token: String,
}

impl RestDatafeed {
    /// Create a client for `base_url` (e.g. `http://host:8000/api/v1`)
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self, DatafeedError> {
        // Url::join replaces the last segment unless the base ends with '/'
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base: Url::parse(&base)?,
            token: token.into(),
        })
    }

    /// Build from `datafeed.url`, `datafeed.token` and `datafeed.timeout_secs`
    pub fn from_settings(settings: &Settings) -> Result<Self, DatafeedError> {
        let url = settings
            .get_string("datafeed.url")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| DatafeedError::NotConfigured("datafeed.url is empty".to_string()))?;
        let token = settings.get_string("datafeed.token").unwrap_or_default();
        let timeout = settings.get_int("datafeed.timeout_secs").unwrap_or(30).max(1) as u64;

        Self::new(&url, token, Duration::from_secs(timeout))
    }

    fn endpoint(&self, path: &str) -> Result<Url, DatafeedError> {
        Ok(self.base.join(path)?)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, DatafeedError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DatafeedError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl BaseDatafeed for RestDatafeed {
    async fn init(&self) -> Result<bool, DatafeedError> {
        info!("market data service at {}", self.base);
        Ok(true)
    }

    async fn query_bar_history(&self, req: &HistoryRequest) -> Result<Vec<BarData>, DatafeedError> {
        let url = self.endpoint("market-data/ohlcv")?;
        let start = req.start.format("%Y-%m-%d").to_string();
        let end = req.end.format("%Y-%m-%d").to_string();

        let request = self.client.get(url).query(&[
            ("symbol", req.symbol.as_str()),
            ("exchange", req.exchange.value()),
            ("from_date", start.as_str()),
            ("to_date", end.as_str()),
            ("interval", req.interval.value()),
        ]);

        let response = Self::check(self.authorize(request).send().await?).await?;
        let records: Vec<OhlcvRecord> = response.json().await?;
        debug!(
            "fetched {} bars for {} {} {}..{}",
            records.len(),
            req.vt_symbol(),
            req.interval,
            req.start,
            req.end
        );

        Ok(records.into_iter().map(|record| record.into_bar(req)).collect())
    }

    async fn resync(&self, req: &HistoryRequest) -> Result<usize, DatafeedError> {
        let url = self.endpoint("admin/fetch-historical")?;
        let body = ResyncBody {
            symbol: &req.symbol,
            exchange: req.exchange.value(),
            from_date: req.start.format("%Y-%m-%d").to_string(),
            to_date: req.end.format("%Y-%m-%d").to_string(),
            interval: req.interval.broker_name(),
        };

        let request = self.client.post(url).json(&body);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let result: ResyncResponse = response.json().await?;
        info!("broker resync for {}: {}", req.vt_symbol(), result.message);

        Ok(result.count)
    }
}

/// In-memory datafeed, used by tests and offline demos
pub struct MemoryDatafeed {
    bars: RwLock<Vec<BarData>>,
    staged: RwLock<Vec<BarData>>,
    failing: AtomicBool,
    queries: AtomicUsize,
}

impl MemoryDatafeed {
    pub fn new() -> Self {
        Self {
            bars: RwLock::new(Vec::new()),
            staged: RwLock::new(Vec::new()),
            failing: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    /// Make bars queryable
    pub fn insert_bars(&self, bars: impl IntoIterator<Item = BarData>) {
        if let Ok(mut data) = self.bars.write() {
            data.extend(bars);
            data.sort_by_key(|bar| bar.datetime);
        }
    }

    /// Hold bars back until a resync is requested
    pub fn stage_for_resync(&self, bars: impl IntoIterator<Item = BarData>) {
        if let Ok(mut staged) = self.staged.write() {
            staged.extend(bars);
        }
    }

    /// Make every query fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of history queries served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Default for MemoryDatafeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseDatafeed for MemoryDatafeed {
    async fn init(&self) -> Result<bool, DatafeedError> {
        Ok(true)
    }

    async fn query_bar_history(&self, req: &HistoryRequest) -> Result<Vec<BarData>, DatafeedError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatafeedError::Unavailable("memory datafeed set to fail".to_string()));
        }

        let data = self
            .bars
            .read()
            .map_err(|e| DatafeedError::Unavailable(e.to_string()))?;

        Ok(data
            .iter()
            .filter(|bar| {
                bar.symbol == req.symbol
                    && bar.exchange == req.exchange
                    && bar.interval == req.interval
                    && {
                        let day = local_date(bar.datetime, bar.exchange);
                        req.start <= day && day <= req.end
                    }
            })
            .cloned()
            .collect())
    }

    async fn resync(&self, req: &HistoryRequest) -> Result<usize, DatafeedError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatafeedError::Unavailable("memory datafeed set to fail".to_string()));
        }

        let released: Vec<BarData> = {
            let mut staged = self
                .staged
                .write()
                .map_err(|e| DatafeedError::Unavailable(e.to_string()))?;
            let (matching, rest): (Vec<_>, Vec<_>) = staged
                .drain(..)
                .partition(|bar| bar.symbol == req.symbol && bar.exchange == req.exchange);
            *staged = rest;
            matching
        };

        let count = released.len();
        self.insert_bars(released);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trader::constant::{Exchange, Interval};
    use crate::trader::object::{ChartKey, DateRange};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn request(day: u32) -> HistoryRequest {
        let key = ChartKey::new("SBIN", Exchange::Nse, Interval::Daily);
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        HistoryRequest::new(&key, DateRange::new(date, date))
    }

    fn daily_bar(day: u32) -> BarData {
        let mut bar = BarData::new(
            "SBIN".to_string(),
            Exchange::Nse,
            Interval::Daily,
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        );
        bar.open_price = 100.0;
        bar.high_price = 101.0;
        bar.low_price = 99.0;
        bar.close_price = 100.5;
        bar
    }

    #[tokio::test]
    async fn test_empty_datafeed() {
        let datafeed = EmptyDatafeed::new();
        assert!(!datafeed.init().await.unwrap());

        let result = datafeed.query_bar_history(&request(2)).await;
        assert!(matches!(result, Err(DatafeedError::NotConfigured(_))));
        assert!(datafeed.resync(&request(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_datafeed_filters_by_local_day() {
        let datafeed = MemoryDatafeed::new();
        datafeed.insert_bars([daily_bar(2), daily_bar(3), daily_bar(4)]);

        let bars = datafeed.query_bar_history(&request(3)).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].datetime, daily_bar(3).datetime);

        let empty = datafeed.query_bar_history(&request(9)).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(datafeed.query_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_datafeed_failure_and_resync() {
        let datafeed = MemoryDatafeed::new();
        datafeed.stage_for_resync([daily_bar(5)]);

        assert!(datafeed.query_bar_history(&request(5)).await.unwrap().is_empty());
        assert_eq!(datafeed.resync(&request(5)).await.unwrap(), 1);
        assert_eq!(datafeed.query_bar_history(&request(5)).await.unwrap().len(), 1);

        datafeed.set_failing(true);
        assert!(matches!(
            datafeed.query_bar_history(&request(5)).await,
            Err(DatafeedError::Unavailable(_))
        ));
    }

    #[test]
    fn test_rest_datafeed_endpoint_keeps_base_path() {
        let datafeed =
            RestDatafeed::new("http://localhost:8000/api/v1", "", Duration::from_secs(5)).unwrap();
        let url = datafeed.endpoint("market-data/ohlcv").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/market-data/ohlcv");
    }
}
