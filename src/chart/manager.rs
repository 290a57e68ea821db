//! Bar store for the chart module.
//!
//! Holds the ordered bar sequence of one chart key with datetime indexing.
//! Bars are kept strictly increasing by `datetime` with no duplicates; every
//! merge either applies completely or not at all, since all mutation goes
//! through `&mut self`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::error::BarRejection;
use crate::trader::object::{BarData, ChartKey};
use crate::trader::utility::is_aligned;

/// Result of a single-bar append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The last bar was replaced in place
    Updated,
    /// A newer bar was pushed
    Appended,
    /// Older than the last bar, dropped
    Stale,
    /// Malformed, dropped
    Rejected(BarRejection),
}

impl AppendOutcome {
    /// Whether the store changed
    pub fn is_applied(&self) -> bool {
        matches!(self, AppendOutcome::Updated | AppendOutcome::Appended)
    }
}

/// Result of a batch merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Bars added to the store
    pub added: usize,
    /// Malformed bars dropped
    pub rejected: usize,
    /// Bars dropped because their time was already covered
    pub duplicates: usize,
    /// No older bars were found; the store stops asking for more
    pub exhausted: bool,
}

/// Ordered bars of one chart key
pub struct BarStore {
    key: ChartKey,
    bars: Vec<BarData>,
    /// Map from datetime to index
    datetime_index_map: HashMap<DateTime<Utc>, usize>,
    no_older_data: bool,
}

impl BarStore {
    /// Create an empty store
    pub fn new(key: ChartKey) -> Self {
        Self {
            key,
            bars: Vec::new(),
            datetime_index_map: HashMap::new(),
            no_older_data: false,
        }
    }

    pub fn key(&self) -> &ChartKey {
        &self.key
    }

    /// Check a bar before it is merged
    pub fn validate(&self, bar: &BarData) -> Result<(), BarRejection> {
        if bar.symbol != self.key.symbol
            || bar.exchange != self.key.exchange
            || bar.interval != self.key.interval
        {
            return Err(BarRejection::ForeignKey);
        }

        let values = [
            bar.open_price,
            bar.high_price,
            bar.low_price,
            bar.close_price,
            bar.volume,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BarRejection::NonFinite);
        }
        if bar.volume < 0.0 {
            return Err(BarRejection::NegativeVolume);
        }
        if bar.high_price < bar.open_price.max(bar.close_price)
            || bar.low_price > bar.open_price.min(bar.close_price)
        {
            return Err(BarRejection::InconsistentRange);
        }
        if !is_aligned(bar.datetime, self.key.interval, self.key.exchange) {
            return Err(BarRejection::Misaligned);
        }
        Ok(())
    }

    /// Keep valid bars, sorted, one per datetime (the later one in input order wins)
    fn sanitize(&self, bars: Vec<BarData>) -> (Vec<BarData>, usize) {
        let mut rejected = 0;
        let mut by_time: HashMap<DateTime<Utc>, BarData> = HashMap::new();

        for bar in bars {
            match self.validate(&bar) {
                Ok(()) => {
                    by_time.insert(bar.datetime, bar);
                }
                Err(reason) => {
                    rejected += 1;
                    warn!("{} dropping bar at {}: {}", self.key, bar.datetime, reason);
                }
            }
        }

        let mut sorted: Vec<BarData> = by_time.into_values().collect();
        sorted.sort_by_key(|bar| bar.datetime);
        (sorted, rejected)
    }

    fn rebuild_index(&mut self) {
        self.datetime_index_map.clear();
        for (ix, bar) in self.bars.iter().enumerate() {
            self.datetime_index_map.insert(bar.datetime, ix);
        }
    }

    /// Replace the whole sequence
    pub fn reset(&mut self, bars: Vec<BarData>) -> MergeReport {
        let (sorted, rejected) = self.sanitize(bars);

        self.bars = sorted;
        self.no_older_data = false;
        self.rebuild_index();

        debug!("{} reset with {} bars", self.key, self.bars.len());
        MergeReport {
            added: self.bars.len(),
            rejected,
            ..MergeReport::default()
        }
    }

    /// Update the bar being built or push a newer one
    pub fn append(&mut self, bar: BarData) -> AppendOutcome {
        if let Err(reason) = self.validate(&bar) {
            warn!("{} dropping live bar at {}: {}", self.key, bar.datetime, reason);
            return AppendOutcome::Rejected(reason);
        }

        let Some(last) = self.bars.last_mut() else {
            self.datetime_index_map.insert(bar.datetime, 0);
            self.bars.push(bar);
            return AppendOutcome::Appended;
        };

        if bar.datetime == last.datetime {
            *last = bar;
            AppendOutcome::Updated
        } else if bar.datetime > last.datetime {
            self.datetime_index_map.insert(bar.datetime, self.bars.len());
            self.bars.push(bar);
            AppendOutcome::Appended
        } else {
            debug!("{} ignoring stale bar at {}", self.key, bar.datetime);
            AppendOutcome::Stale
        }
    }

    /// Splice older bars before the current first bar.
    ///
    /// Bars whose time is already covered by the store are dropped. When
    /// nothing older survives, the store is flagged as having no older data.
    pub fn prepend(&mut self, bars: Vec<BarData>) -> MergeReport {
        let incoming = bars.len();
        let (sorted, rejected) = self.sanitize(bars);

        let older: Vec<BarData> = match self.bars.first() {
            Some(first) => {
                let first_time = first.datetime;
                sorted
                    .into_iter()
                    .filter(|bar| bar.datetime < first_time)
                    .collect()
            }
            None => sorted,
        };

        let added = older.len();
        let report = MergeReport {
            added,
            rejected,
            duplicates: incoming - rejected - added,
            exhausted: added == 0,
        };

        if added == 0 {
            self.no_older_data = true;
            debug!("{} has no older data", self.key);
            return report;
        }

        let mut merged = older;
        merged.append(&mut self.bars);
        self.bars = merged;
        self.rebuild_index();

        debug!("{} prepended {} bars, now {}", self.key, added, self.bars.len());
        report
    }

    /// Whether an older page came back empty since the last reset
    pub fn no_older_data(&self) -> bool {
        self.no_older_data
    }

    /// Get total number of bars
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Get all bar data
    pub fn bars(&self) -> &[BarData] {
        &self.bars
    }

    pub fn first(&self) -> Option<&BarData> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&BarData> {
        self.bars.last()
    }

    /// Get index for a datetime
    pub fn get_index(&self, dt: DateTime<Utc>) -> Option<usize> {
        self.datetime_index_map.get(&dt).copied()
    }
}

/// Lowest low and highest high over `bars`
pub fn price_range(bars: &[BarData]) -> Option<(f64, f64)> {
    let first = bars.first()?;
    Some(bars.iter().skip(1).fold(
        (first.low_price, first.high_price),
        |(low, high), bar| (low.min(bar.low_price), high.max(bar.high_price)),
    ))
}

/// Zero up to the largest volume over `bars`
pub fn volume_range(bars: &[BarData]) -> Option<(f64, f64)> {
    if bars.is_empty() {
        return None;
    }
    Some((0.0, bars.iter().map(|bar| bar.volume).fold(0.0, f64::max)))
}
