//! Chart widget: one open chart and everything it owns.
//!
//! The widget ties the bar store, indicators, live updater, history pager and
//! replay controller of a single chart key to its renderer. It decides what
//! gets pushed to the renderer after every change: a full series after
//! structural changes, only the trailing point after live ticks.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::base::PRICE_DECIMALS;
use super::config::EngineConfig;
use super::error::ChartError;
use super::history::{HistoryPager, HistoryStatus};
use super::indicator::{Indicator, IndicatorConfig, IndicatorSet};
use super::item::{
    candle_points, info_text, line_point, line_points, volume_points, CandlePoint, VolumePoint,
};
use super::live::LiveUpdater;
use super::manager::{price_range, volume_range, BarStore};
use super::render::{LogicalRange, RenderAdapter, ViewportListener};
use super::replay::{ReplayController, ReplayState};
use crate::trader::datafeed::DatafeedError;
use crate::trader::object::{BarData, ChartKey, DateRange, HistoryRequest, PriceTick};
use crate::trader::utility::local_date;

/// Non-blocking status indicator of a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartStatus {
    /// Initial load in flight
    Loading,
    Ready,
    /// The range holds no bars
    NoData,
    /// Last fetch failed; showing what we have
    Degraded,
}

/// Read-only summary of a chart
#[derive(Debug, Clone, PartialEq)]
pub struct ChartInfo {
    pub key: ChartKey,
    pub range: DateRange,
    pub status: ChartStatus,
    pub history: HistoryStatus,
    pub bar_count: usize,
    pub live: bool,
    pub replay: Option<ReplayState>,
    pub visible: Option<VisibleWindow>,
}

/// Bars currently in the viewport and the axis ranges they need
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleWindow {
    pub first_index: usize,
    pub last_index: usize,
    /// Candle range widened by the indicator values in view
    pub price: (f64, f64),
    pub volume: (f64, f64),
    /// Crosshair text of the last bar in view
    pub last_bar_text: String,
}

/// One open chart
pub struct ChartWidget {
    key: ChartKey,
    range: DateRange,
    generation: u64,
    store: BarStore,
    indicators: IndicatorSet,
    renderer: Box<dyn RenderAdapter>,
    live: LiveUpdater,
    pager: HistoryPager,
    replay: ReplayController,
    status: ChartStatus,
    /// Overlay ids currently on the renderer
    published: BTreeSet<String>,
    resynced: bool,
    reload_interval: Duration,
    /// Retry of a failed initial load
    reload_at: Option<Instant>,
}

impl ChartWidget {
    pub fn new(
        key: ChartKey,
        range: DateRange,
        generation: u64,
        mut renderer: Box<dyn RenderAdapter>,
        listener: ViewportListener,
        indicator_config: IndicatorConfig,
        config: &EngineConfig,
    ) -> Self {
        renderer.on_visible_range_changed(listener);

        Self {
            store: BarStore::new(key.clone()),
            indicators: IndicatorSet::new(indicator_config),
            live: LiveUpdater::new(config.poll_interval, config.use_snapshot_ticks),
            pager: HistoryPager::new(config.trigger_bars, config.lookback_days(key.interval)),
            replay: ReplayController::new(key.clone(), config.replay_base_interval, config.replay_floor),
            key,
            range,
            generation,
            renderer,
            status: ChartStatus::Loading,
            published: BTreeSet::new(),
            resynced: false,
            reload_interval: config.poll_interval,
            reload_at: None,
        }
    }

    pub fn key(&self) -> &ChartKey {
        &self.key
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> ChartStatus {
        self.status
    }

    pub fn store(&self) -> &BarStore {
        &self.store
    }

    pub fn indicators(&self) -> &IndicatorSet {
        &self.indicators
    }

    pub fn replay(&self) -> &ReplayController {
        &self.replay
    }

    pub fn info(&self) -> ChartInfo {
        ChartInfo {
            key: self.key.clone(),
            range: self.range,
            status: self.status,
            history: self.pager.status(&self.store),
            bar_count: self.store.len(),
            live: self.live.is_running(),
            replay: self.replay.state(),
            visible: self.visible_window(),
        }
    }

    /// Bars and indicators on the renderer, replay prefix included
    fn displayed(&self) -> (&[BarData], &IndicatorSet) {
        if self.replay.is_active() {
            (self.replay.visible_bars(), self.replay.indicators())
        } else {
            (self.store.bars(), &self.indicators)
        }
    }

    /// Window of displayed bars under the renderer's visible time range;
    /// everything when the renderer has no range yet
    pub fn visible_window(&self) -> Option<VisibleWindow> {
        let (bars, indicators) = self.displayed();
        let (first_index, last_index) = match self.renderer.get_visible_range() {
            Some(range) => (
                bars.partition_point(|bar| bar.datetime.timestamp() < range.from),
                bars.partition_point(|bar| bar.datetime.timestamp() <= range.to)
                    .checked_sub(1)?,
            ),
            None => (0, bars.len().checked_sub(1)?),
        };
        if first_index > last_index {
            return None;
        }

        let window = &bars[first_index..=last_index];
        let (mut low, mut high) = price_range(window)?;
        for indicator in indicators.indicators() {
            if let Some((line_low, line_high)) = indicator.get_y_range(first_index, last_index) {
                low = low.min(line_low);
                high = high.max(line_high);
            }
        }

        Some(VisibleWindow {
            first_index,
            last_index,
            price: (low, high),
            volume: volume_range(window)?,
            last_bar_text: info_text(&bars[last_index], PRICE_DECIMALS),
        })
    }

    /// Request for the initial load
    pub fn initial_request(&self) -> HistoryRequest {
        HistoryRequest::new(&self.key, self.range)
    }

    /// Claim the single broker resync allowed per load
    pub fn take_resync(&mut self) -> bool {
        !std::mem::replace(&mut self.resynced, true)
    }

    // ==================== Initial load ====================

    pub fn load(&mut self, bars: Vec<BarData>, now: Instant, today: NaiveDate) {
        self.reload_at = None;
        let report = self.store.reset(bars);
        self.indicators.recalculate(self.store.bars());
        self.status = if self.store.is_empty() {
            ChartStatus::NoData
        } else {
            ChartStatus::Ready
        };
        self.render_full(true);

        if LiveUpdater::is_eligible(&self.key, &self.range, today) {
            self.live.start(now);
        }

        info!(
            "{} loaded {} bars ({} rejected), status {:?}",
            self.key, report.added, report.rejected, self.status
        );
    }

    /// Keep whatever is shown and retry the initial load one poll interval later
    pub fn load_failed(&mut self, error: &DatafeedError, now: Instant) {
        self.status = ChartStatus::Degraded;
        self.reload_at = Some(now + self.reload_interval);
        warn!(
            "{} initial load failed, retrying in {:?}: {}",
            self.key, self.reload_interval, error
        );
    }

    /// Initial request again if a retry is due
    pub fn due_reload(&mut self, now: Instant) -> Option<HistoryRequest> {
        match self.reload_at {
            Some(at) if at <= now => {
                self.reload_at = None;
                Some(self.initial_request())
            }
            _ => None,
        }
    }

    // ==================== Live updates ====================

    /// Poll request if the live timer is due
    pub fn due_live_poll(&mut self, now: Instant, today: NaiveDate) -> Option<HistoryRequest> {
        if self.replay.is_active() || self.status == ChartStatus::Loading {
            return None;
        }
        if !LiveUpdater::is_eligible(&self.key, &self.range, today) {
            if self.live.is_running() {
                debug!("{} range no longer reaches today, stopping live updates", self.key);
                self.live.stop();
            }
            return None;
        }
        self.live.begin_poll(&self.key, today, now)
    }

    pub fn apply_live(&mut self, bars: Vec<BarData>) {
        self.live.finish_poll(true);
        if self.replay.is_active() {
            debug!("{} dropping live bars during replay", self.key);
            return;
        }

        let was_empty = self.store.is_empty();
        let mut applied = 0;
        for bar in LiveUpdater::fresh_bars(&self.store, bars) {
            let previous_day = self.last_day();
            if !self.store.append(bar).is_applied() {
                continue;
            }
            applied += 1;
            if !was_empty {
                self.indicators.update_last(self.store.bars());
                let new_day = previous_day != self.last_day();
                self.render_last(new_day);
            }
        }

        if was_empty && applied > 0 {
            self.indicators.recalculate(self.store.bars());
            self.render_full(true);
        }
        if !self.store.is_empty() {
            self.status = ChartStatus::Ready;
        }
        debug!("{} live poll applied {} bars", self.key, applied);
    }

    pub fn live_failed(&mut self, error: &DatafeedError) {
        let failures = self.live.finish_poll(false);
        self.status = ChartStatus::Degraded;
        warn!("{} live poll failed ({} in a row): {}", self.key, failures, error);
    }

    /// Move the last candle with a snapshot price
    pub fn apply_tick(&mut self, tick: &PriceTick) -> bool {
        if !self.live.is_running() || !self.live.uses_snapshot_ticks() || self.replay.is_active() {
            return false;
        }

        let previous_day = self.last_day();
        if !LiveUpdater::apply_tick(&mut self.store, tick).is_applied() {
            return false;
        }

        if self.store.len() == 1 {
            self.indicators.recalculate(self.store.bars());
            self.render_full(true);
        } else {
            self.indicators.update_last(self.store.bars());
            let new_day = previous_day != self.last_day();
            self.render_last(new_day);
        }
        self.status = ChartStatus::Ready;
        true
    }

    fn last_day(&self) -> Option<NaiveDate> {
        self.store
            .last()
            .map(|bar| local_date(bar.datetime, self.key.exchange))
    }

    // ==================== History paging ====================

    pub fn viewport_changed(&mut self, range: LogicalRange) -> Option<HistoryRequest> {
        if self.replay.is_active() || self.status == ChartStatus::Loading {
            return None;
        }
        self.pager.on_viewport(range, &self.store)
    }

    pub fn apply_history(&mut self, bars: Vec<BarData>) {
        self.pager.finish();
        if self.replay.is_active() {
            debug!("{} dropping history page during replay", self.key);
            return;
        }

        let visible = self.renderer.get_visible_range();
        let report = self.store.prepend(bars);
        if report.added > 0 {
            self.indicators.recalculate(self.store.bars());
            self.render_full(false);
            if let Some(range) = visible {
                self.renderer.set_visible_range(range);
            }
        }

        debug!(
            "{} history page: {} added, {} duplicates, exhausted {}",
            self.key, report.added, report.duplicates, report.exhausted
        );
    }

    pub fn history_failed(&mut self, error: &DatafeedError) {
        self.pager.fail();
        warn!("{} history page failed: {}", self.key, error);
    }

    // ==================== Indicators ====================

    pub fn set_indicator_config(&mut self, config: IndicatorConfig) {
        self.indicators = IndicatorSet::new(config.clone());
        self.indicators.recalculate(self.store.bars());

        if self.replay.is_active() {
            self.replay.set_indicator_config(config);
            publish_overlays(
                self.renderer.as_mut(),
                &mut self.published,
                self.replay.indicators(),
                self.replay.visible_bars(),
            );
        } else {
            publish_overlays(
                self.renderer.as_mut(),
                &mut self.published,
                &self.indicators,
                self.store.bars(),
            );
        }
    }

    // ==================== Replay ====================

    pub fn replay_enter(&mut self) -> Result<ReplayState, ChartError> {
        self.replay
            .enter(self.store.bars(), self.indicators.config().clone())?;
        self.live.stop();
        self.render_replay(true);
        self.replay_state()
    }

    pub fn replay_step(&mut self) -> Result<ReplayState, ChartError> {
        if self.replay.step()? {
            self.render_replay_step();
        }
        self.replay_state()
    }

    pub fn replay_play(&mut self, now: Instant) -> Result<ReplayState, ChartError> {
        self.replay.play(now)?;
        self.replay_state()
    }

    pub fn replay_pause(&mut self) -> Result<ReplayState, ChartError> {
        self.replay.pause()?;
        self.replay_state()
    }

    pub fn replay_seek(&mut self, index: usize) -> Result<ReplayState, ChartError> {
        self.replay.seek(index)?;
        self.render_replay(false);
        self.replay_state()
    }

    pub fn replay_set_speed(&mut self, speed: f64, now: Instant) -> Result<ReplayState, ChartError> {
        self.replay.set_speed(speed, now)?;
        self.replay_state()
    }

    /// Leave replay and show the full live series again
    pub fn replay_exit(&mut self, now: Instant, today: NaiveDate) -> Result<(), ChartError> {
        if !self.replay.exit() {
            return Err(ChartError::ReplayInactive(self.key.clone()));
        }

        self.render_full(true);
        if LiveUpdater::is_eligible(&self.key, &self.range, today) {
            self.live.start(now);
        }
        Ok(())
    }

    fn replay_state(&self) -> Result<ReplayState, ChartError> {
        self.replay
            .state()
            .ok_or_else(|| ChartError::ReplayInactive(self.key.clone()))
    }

    // ==================== Timers ====================

    /// Earliest timer owned by this chart
    pub fn next_deadline(&self) -> Option<Instant> {
        let live = if self.replay.is_active() {
            None
        } else {
            self.live.deadline()
        };
        [live, self.replay.deadline(), self.reload_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire the replay timer if due
    pub fn fire_timers(&mut self, now: Instant) -> bool {
        let moved = self.replay.on_timer(now);
        if moved {
            self.render_replay_step();
        }
        moved
    }

    /// Tear down timers and overlays and hand the renderer back
    pub fn teardown(mut self) -> Box<dyn RenderAdapter> {
        self.live.stop();
        self.replay.exit();
        for id in std::mem::take(&mut self.published) {
            self.renderer.remove_overlay_series(&id);
        }
        self.renderer
    }

    // ==================== Rendering ====================

    fn render_full(&mut self, fit: bool) {
        let bars = self.store.bars();
        self.renderer
            .set_full_series(&candle_points(bars), &volume_points(bars));
        publish_overlays(self.renderer.as_mut(), &mut self.published, &self.indicators, bars);
        if fit {
            self.renderer.fit_content();
        }
    }

    fn render_last(&mut self, new_day: bool) {
        let bars = self.store.bars();
        let Some(last) = bars.last() else {
            return;
        };

        self.renderer
            .update_last_bar(CandlePoint::from(last), VolumePoint::from(last));
        if new_day {
            // Day-scoped series (CPR) move as a whole
            publish_overlays(self.renderer.as_mut(), &mut self.published, &self.indicators, bars);
        } else {
            push_last_points(self.renderer.as_mut(), &mut self.published, &self.indicators, bars);
        }
    }

    fn render_replay(&mut self, fit: bool) {
        let bars = self.replay.visible_bars();
        self.renderer
            .set_full_series(&candle_points(bars), &volume_points(bars));
        publish_overlays(
            self.renderer.as_mut(),
            &mut self.published,
            self.replay.indicators(),
            bars,
        );
        if fit {
            self.renderer.fit_content();
        }
    }

    fn render_replay_step(&mut self) {
        let bars = self.replay.visible_bars();
        let Some(last) = bars.last() else {
            return;
        };

        self.renderer
            .update_last_bar(CandlePoint::from(last), VolumePoint::from(last));
        push_last_points(
            self.renderer.as_mut(),
            &mut self.published,
            self.replay.indicators(),
            bars,
        );
    }
}

/// Publish every indicator line over `bars`, dropping lines that no longer
/// exist or have no values
fn publish_overlays(
    renderer: &mut dyn RenderAdapter,
    published: &mut BTreeSet<String>,
    indicators: &IndicatorSet,
    bars: &[BarData],
) {
    let mut current = BTreeSet::new();

    for (line, series) in indicators.lines() {
        let end = bars.len().min(series.len());
        let points = line_points(&bars[..end], &series[..end]);
        if points.is_empty() {
            continue;
        }
        renderer.add_overlay_series(&line.id, &points, &line.style);
        current.insert(line.id.clone());
    }

    for id in published.difference(&current) {
        renderer.remove_overlay_series(id);
    }
    *published = current;
}

/// Push the value at the last bar of every indicator line
fn push_last_points(
    renderer: &mut dyn RenderAdapter,
    published: &mut BTreeSet<String>,
    indicators: &IndicatorSet,
    bars: &[BarData],
) {
    let Some(last_ix) = bars.len().checked_sub(1) else {
        return;
    };

    for (line, series) in indicators.lines() {
        let value = series.get(last_ix).copied().flatten();
        match (line_point(&bars[last_ix], value), published.contains(&line.id)) {
            (Some(point), true) => renderer.update_overlay_point(&line.id, point),
            (Some(_), false) => {
                let end = bars.len().min(series.len());
                let points = line_points(&bars[..end], &series[..end]);
                renderer.add_overlay_series(&line.id, &points, &line.style);
                published.insert(line.id.clone());
            }
            (None, _) => {}
        }
    }
}
