//! Live updater.
//!
//! Polls today's bars for an intraday chart on a fixed cadence and folds the
//! newest ones into the store. Optionally the last candle is also moved by
//! price ticks from the session snapshot channel.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;
use tracing::debug;

use super::manager::{AppendOutcome, BarStore};
use crate::trader::object::{BarData, ChartKey, DateRange, HistoryRequest, PriceTick};
use crate::trader::utility::bucket_start;

/// Poll cadence and in-flight bookkeeping of one chart
pub struct LiveUpdater {
    poll_interval: Duration,
    use_snapshot_ticks: bool,
    next_poll: Option<Instant>,
    in_flight: bool,
    failures: u32,
}

impl LiveUpdater {
    pub fn new(poll_interval: Duration, use_snapshot_ticks: bool) -> Self {
        Self {
            poll_interval,
            use_snapshot_ticks,
            next_poll: None,
            in_flight: false,
            failures: 0,
        }
    }

    /// Live data only makes sense for intraday bars of a range reaching today
    pub fn is_eligible(key: &ChartKey, range: &DateRange, today: NaiveDate) -> bool {
        key.interval.is_intraday() && range.contains(today)
    }

    pub fn is_running(&self) -> bool {
        self.next_poll.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Arm the timer; the first poll happens one interval from `now`
    pub fn start(&mut self, now: Instant) {
        if self.next_poll.is_none() {
            self.next_poll = Some(now + self.poll_interval);
        }
    }

    /// Tear the timer down
    pub fn stop(&mut self) {
        self.next_poll = None;
        self.in_flight = false;
    }

    /// Deadline of the next poll, hidden while one is in flight
    pub fn deadline(&self) -> Option<Instant> {
        if self.in_flight {
            None
        } else {
            self.next_poll
        }
    }

    /// Start a poll if one is due. Polls that would overlap are coalesced.
    pub fn begin_poll(&mut self, key: &ChartKey, today: NaiveDate, now: Instant) -> Option<HistoryRequest> {
        let due = self.next_poll.map(|at| at <= now).unwrap_or(false);
        if !due || self.in_flight {
            return None;
        }

        self.in_flight = true;
        self.next_poll = Some(now + self.poll_interval);
        Some(HistoryRequest::new(key, DateRange::new(today, today)))
    }

    /// Poll answered; returns the consecutive failure count
    pub fn finish_poll(&mut self, success: bool) -> u32 {
        self.in_flight = false;
        if success {
            self.failures = 0;
        } else {
            self.failures += 1;
        }
        self.failures
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn uses_snapshot_ticks(&self) -> bool {
        self.use_snapshot_ticks
    }

    /// Bars of a poll that can still change the store: the one being built
    /// and anything newer, oldest first
    pub fn fresh_bars(store: &BarStore, mut bars: Vec<BarData>) -> Vec<BarData> {
        bars.sort_by_key(|bar| bar.datetime);
        match store.last() {
            Some(last) => {
                let last_time = last.datetime;
                bars.retain(|bar| bar.datetime >= last_time);
                bars
            }
            None => bars,
        }
    }

    /// Candle produced by a price tick, or `None` when the tick is older than
    /// the candle being built
    pub fn tick_bar(store: &BarStore, tick: &PriceTick) -> Option<BarData> {
        let key = store.key();
        let bucket = bucket_start(tick.datetime, key.interval, key.exchange);

        match store.last() {
            Some(last) if bucket == last.datetime => {
                let mut bar = last.clone();
                bar.close_price = tick.price;
                bar.high_price = bar.high_price.max(tick.price);
                bar.low_price = bar.low_price.min(tick.price);
                Some(bar)
            }
            Some(last) if bucket < last.datetime => {
                debug!("{} tick at {} older than last bar", key, tick.datetime);
                None
            }
            _ => {
                let mut bar = BarData::new(key.symbol.clone(), key.exchange, key.interval, bucket);
                bar.open_price = tick.price;
                bar.high_price = tick.price;
                bar.low_price = tick.price;
                bar.close_price = tick.price;
                Some(bar)
            }
        }
    }

    /// Fold a tick into the store
    pub fn apply_tick(store: &mut BarStore, tick: &PriceTick) -> AppendOutcome {
        match Self::tick_bar(store, tick) {
            Some(bar) => store.append(bar),
            None => AppendOutcome::Stale,
        }
    }
}
