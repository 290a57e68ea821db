//! History pager.
//!
//! Watches the visible logical range and asks for an older page when the
//! left edge gets close to the first loaded bar.

use chrono::Duration;
use tracing::debug;

use super::manager::BarStore;
use super::render::LogicalRange;
use crate::trader::object::{DateRange, HistoryRequest};
use crate::trader::utility::local_date;

/// Paging state shown next to the chart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Idle,
    Fetching,
    /// An older page came back empty; no further pages for this key
    Exhausted,
    /// The last page request failed; scrolling left asks again
    Failed,
}

/// Older-page trigger of one chart
pub struct HistoryPager {
    trigger_bars: usize,
    lookback_days: i64,
    in_flight: bool,
    failed: bool,
}

impl HistoryPager {
    pub fn new(trigger_bars: usize, lookback_days: i64) -> Self {
        Self {
            trigger_bars,
            lookback_days: lookback_days.max(1),
            in_flight: false,
            failed: false,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn status(&self, store: &BarStore) -> HistoryStatus {
        if self.in_flight {
            HistoryStatus::Fetching
        } else if store.no_older_data() {
            HistoryStatus::Exhausted
        } else if self.failed {
            HistoryStatus::Failed
        } else {
            HistoryStatus::Idle
        }
    }

    /// Date range of the page before the first loaded bar: the
    /// `lookback_days` calendar days ending the day before it
    pub fn older_range(&self, store: &BarStore) -> Option<DateRange> {
        let first = store.first()?;
        let earliest = local_date(first.datetime, store.key().exchange);
        let end = earliest - Duration::days(1);
        let start = earliest - Duration::days(self.lookback_days);
        Some(DateRange::new(start, end))
    }

    /// Decide on a viewport change; marks the pager in flight when it fires
    pub fn on_viewport(&mut self, range: LogicalRange, store: &BarStore) -> Option<HistoryRequest> {
        if range.from >= self.trigger_bars as f64 || self.in_flight || store.no_older_data() {
            return None;
        }

        let older = self.older_range(store)?;
        self.in_flight = true;
        self.failed = false;
        debug!(
            "{} paging older history {} .. {}",
            store.key(),
            older.start,
            older.end
        );
        Some(HistoryRequest::new(store.key(), older))
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
        self.failed = false;
    }

    pub fn fail(&mut self) {
        self.in_flight = false;
        self.failed = true;
    }
}
