//! Render adapter boundary.
//!
//! The chart engine never draws. It pushes full or incremental series to a
//! [`RenderAdapter`] and listens to one event coming back: the visible
//! logical range changed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::base::OverlayStyle;
use super::item::{CandlePoint, LinePoint, VolumePoint};
use crate::trader::object::ChartKey;

/// Visible bar indices; fractional and possibly negative past the first bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalRange {
    pub from: f64,
    pub to: f64,
}

impl LogicalRange {
    pub fn new(from: f64, to: f64) -> Self {
        Self { from, to }
    }
}

/// Visible time span in unix seconds, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }
}

/// Viewport change reported by the renderer of one chart
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportEvent {
    pub key: ChartKey,
    pub range: LogicalRange,
}

/// Subscription handed to a renderer; forwards viewport changes to the engine
#[derive(Debug, Clone)]
pub struct ViewportListener {
    key: ChartKey,
    sender: mpsc::UnboundedSender<ViewportEvent>,
}

impl ViewportListener {
    pub fn new(key: ChartKey, sender: mpsc::UnboundedSender<ViewportEvent>) -> Self {
        Self { key, sender }
    }

    pub fn key(&self) -> &ChartKey {
        &self.key
    }

    /// Report a new visible range; false once the engine is gone
    pub fn notify(&self, range: LogicalRange) -> bool {
        self.sender
            .send(ViewportEvent {
                key: self.key.clone(),
                range,
            })
            .is_ok()
    }
}

/// The charting library as seen by the engine
pub trait RenderAdapter: Send {
    /// Replace candles and volume wholesale
    fn set_full_series(&mut self, candles: &[CandlePoint], volumes: &[VolumePoint]);

    /// Update or append the trailing candle without touching the viewport
    fn update_last_bar(&mut self, candle: CandlePoint, volume: VolumePoint);

    /// Create or replace an overlay line
    fn add_overlay_series(&mut self, id: &str, points: &[LinePoint], style: &OverlayStyle);

    /// Update or append the trailing point of an overlay line
    fn update_overlay_point(&mut self, id: &str, point: LinePoint);

    fn remove_overlay_series(&mut self, id: &str);

    fn get_visible_range(&self) -> Option<TimeRange>;

    fn set_visible_range(&mut self, range: TimeRange);

    /// Fit the viewport to all loaded bars
    fn fit_content(&mut self);

    /// Register the viewport listener, replacing any previous one
    fn on_visible_range_changed(&mut self, listener: ViewportListener);
}

/// Everything a [`MemoryRenderer`] has been told
#[derive(Debug, Default)]
pub struct RenderState {
    pub candles: Vec<CandlePoint>,
    pub volumes: Vec<VolumePoint>,
    pub overlays: BTreeMap<String, (OverlayStyle, Vec<LinePoint>)>,
    /// Visible logical range, kept by index across full series updates
    pub logical: Option<LogicalRange>,
    pub listener: Option<ViewportListener>,
    pub full_series_count: usize,
    pub last_bar_updates: usize,
    pub fit_count: usize,
}

impl RenderState {
    fn time_range(&self, logical: LogicalRange) -> Option<TimeRange> {
        let last_ix = self.candles.len().checked_sub(1)?;
        let clamp = |value: f64| (value.max(0.0) as usize).min(last_ix);
        let from = clamp(logical.from.floor());
        let to = clamp(logical.to.ceil());
        Some(TimeRange::new(self.candles[from].time, self.candles[to].time))
    }

    fn logical_range(&self, range: TimeRange) -> Option<LogicalRange> {
        if self.candles.is_empty() {
            return None;
        }
        let from = self.candles.partition_point(|c| c.time < range.from);
        let to = self.candles.partition_point(|c| c.time <= range.to).max(1) - 1;
        Some(LogicalRange::new(from as f64, to.max(from) as f64))
    }
}

/// Headless renderer that records calls, shared between the engine and its
/// observers through clones
#[derive(Debug, Clone, Default)]
pub struct MemoryRenderer {
    state: Arc<Mutex<RenderState>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the recorded state
    pub fn state(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn candles(&self) -> Vec<CandlePoint> {
        self.state().candles.clone()
    }

    pub fn overlay(&self, id: &str) -> Option<Vec<LinePoint>> {
        self.state().overlays.get(id).map(|(_, points)| points.clone())
    }

    pub fn overlay_ids(&self) -> Vec<String> {
        self.state().overlays.keys().cloned().collect()
    }

    pub fn logical_range(&self) -> Option<LogicalRange> {
        self.state().logical
    }

    /// Simulate the user scrolling; notifies the listener
    pub fn scroll_to(&self, range: LogicalRange) -> bool {
        let listener = {
            let mut state = self.state();
            state.logical = Some(range);
            state.listener.clone()
        };
        listener.map(|listener| listener.notify(range)).unwrap_or(false)
    }
}

impl RenderAdapter for MemoryRenderer {
    fn set_full_series(&mut self, candles: &[CandlePoint], volumes: &[VolumePoint]) {
        let mut state = self.state();
        state.candles = candles.to_vec();
        state.volumes = volumes.to_vec();
        state.full_series_count += 1;
    }

    fn update_last_bar(&mut self, candle: CandlePoint, volume: VolumePoint) {
        let mut state = self.state();
        match state.candles.last_mut() {
            Some(last) if last.time == candle.time => *last = candle,
            _ => state.candles.push(candle),
        }
        match state.volumes.last_mut() {
            Some(last) if last.time == volume.time => *last = volume,
            _ => state.volumes.push(volume),
        }
        state.last_bar_updates += 1;
    }

    fn add_overlay_series(&mut self, id: &str, points: &[LinePoint], style: &OverlayStyle) {
        self.state()
            .overlays
            .insert(id.to_string(), (style.clone(), points.to_vec()));
    }

    fn update_overlay_point(&mut self, id: &str, point: LinePoint) {
        let mut state = self.state();
        let Some((_, points)) = state.overlays.get_mut(id) else {
            return;
        };
        match points.last_mut() {
            Some(last) if last.time == point.time => *last = point,
            _ => points.push(point),
        }
    }

    fn remove_overlay_series(&mut self, id: &str) {
        self.state().overlays.remove(id);
    }

    fn get_visible_range(&self) -> Option<TimeRange> {
        let state = self.state();
        state.logical.and_then(|logical| state.time_range(logical))
    }

    fn set_visible_range(&mut self, range: TimeRange) {
        let mut state = self.state();
        if let Some(logical) = state.logical_range(range) {
            state.logical = Some(logical);
        }
    }

    fn fit_content(&mut self) {
        let mut state = self.state();
        let len = state.candles.len();
        state.logical = (len > 0).then(|| LogicalRange::new(0.0, (len - 1) as f64));
        state.fit_count += 1;
    }

    fn on_visible_range_changed(&mut self, listener: ViewportListener) {
        self.state().listener = Some(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::fixtures::{make_bar, minute_key, session_minute};
    use crate::chart::item::{candle_points, volume_points};

    fn loaded(count: i64) -> MemoryRenderer {
        let key = minute_key();
        let bars: Vec<_> = (0..count).map(|i| make_bar(&key, session_minute(i), 100.0)).collect();
        let mut renderer = MemoryRenderer::new();
        renderer.set_full_series(&candle_points(&bars), &volume_points(&bars));
        renderer
    }

    #[test]
    fn test_visible_range_round_trip() {
        let mut renderer = loaded(20);
        renderer.fit_content();
        assert_eq!(renderer.logical_range(), Some(LogicalRange::new(0.0, 19.0)));

        let t5 = session_minute(5).timestamp();
        let t9 = session_minute(9).timestamp();
        renderer.set_visible_range(TimeRange::new(t5, t9));
        assert_eq!(renderer.logical_range(), Some(LogicalRange::new(5.0, 9.0)));
        assert_eq!(renderer.get_visible_range(), Some(TimeRange::new(t5, t9)));
    }

    #[test]
    fn test_update_last_bar_replaces_or_pushes() {
        let mut renderer = loaded(3);
        let mut candle = renderer.candles()[2];
        candle.close = 101.0;
        let volume = VolumePoint {
            time: candle.time,
            value: 5.0,
            color: crate::chart::base::UP_VOLUME_COLOR,
        };
        renderer.update_last_bar(candle, volume);
        assert_eq!(renderer.candles().len(), 3);

        candle.time += 60;
        renderer.update_last_bar(candle, VolumePoint { time: candle.time, ..volume });
        assert_eq!(renderer.candles().len(), 4);
        assert_eq!(renderer.state().last_bar_updates, 2);
    }

    #[tokio::test]
    async fn test_scroll_notifies_listener() {
        let renderer = loaded(5);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut adapter = renderer.clone();
        adapter.on_visible_range_changed(ViewportListener::new(minute_key(), tx));

        assert!(renderer.scroll_to(LogicalRange::new(-2.0, 3.0)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, minute_key());
        assert_eq!(event.range.from, -2.0);
    }
}
