//! Replay controller.
//!
//! Replay freezes a copy of the chart's bars and walks a cursor over it,
//! either by manual steps or on a timer. Indicators are computed once over
//! the whole snapshot and shown as a prefix, which is exact because every
//! series only looks backwards.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::error::ChartError;
use super::indicator::{IndicatorConfig, IndicatorSet};
use crate::trader::object::{BarData, ChartKey};

/// Replay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPhase {
    Inactive,
    /// Entered, never played
    Armed,
    Playing,
    Paused,
}

/// Snapshot of the replay position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayState {
    pub cursor_index: usize,
    pub playing: bool,
    pub speed_multiplier: f64,
}

/// Replay state machine of one chart
pub struct ReplayController {
    key: ChartKey,
    phase: ReplayPhase,
    snapshot: Vec<BarData>,
    indicators: IndicatorSet,
    cursor: usize,
    speed: f64,
    base_interval: Duration,
    floor: Duration,
    deadline: Option<Instant>,
}

impl ReplayController {
    pub fn new(key: ChartKey, base_interval: Duration, floor: Duration) -> Self {
        Self {
            key,
            phase: ReplayPhase::Inactive,
            snapshot: Vec::new(),
            indicators: IndicatorSet::new(IndicatorConfig::empty()),
            cursor: 0,
            speed: 1.0,
            base_interval,
            floor,
            deadline: None,
        }
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != ReplayPhase::Inactive
    }

    pub fn is_playing(&self) -> bool {
        self.phase == ReplayPhase::Playing
    }

    /// Position while active
    pub fn state(&self) -> Option<ReplayState> {
        self.is_active().then_some(ReplayState {
            cursor_index: self.cursor,
            playing: self.is_playing(),
            speed_multiplier: self.speed,
        })
    }

    fn ensure_active(&self) -> Result<(), ChartError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ChartError::ReplayInactive(self.key.clone()))
        }
    }

    fn last_index(&self) -> usize {
        self.snapshot.len().saturating_sub(1)
    }

    /// Bars `[0..=cursor]`
    pub fn visible_bars(&self) -> &[BarData] {
        let end = (self.cursor + 1).min(self.snapshot.len());
        &self.snapshot[..end]
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }

    /// Indicators over the whole snapshot
    pub fn indicators(&self) -> &IndicatorSet {
        &self.indicators
    }

    /// Freeze `bars` and put the cursor on the first bar
    pub fn enter(&mut self, bars: &[BarData], config: IndicatorConfig) -> Result<(), ChartError> {
        if bars.is_empty() {
            return Err(ChartError::EmptyStore(self.key.clone()));
        }

        self.snapshot = bars.to_vec();
        self.indicators = IndicatorSet::new(config);
        self.indicators.recalculate(&self.snapshot);
        self.cursor = 0;
        self.speed = 1.0;
        self.deadline = None;
        self.phase = ReplayPhase::Armed;

        info!("{} replay entered over {} bars", self.key, self.snapshot.len());
        Ok(())
    }

    /// Rebuild the snapshot indicators after a selection change
    pub fn set_indicator_config(&mut self, config: IndicatorConfig) {
        self.indicators = IndicatorSet::new(config);
        self.indicators.recalculate(&self.snapshot);
    }

    /// Advance one bar. Returns whether the cursor moved.
    ///
    /// Reaching (or sitting on) the last bar stops auto-play.
    pub fn step(&mut self) -> Result<bool, ChartError> {
        self.ensure_active()?;

        let moved = self.cursor < self.last_index();
        if moved {
            self.cursor += 1;
        }
        if self.cursor == self.last_index() && self.is_playing() {
            debug!("{} replay reached the last bar", self.key);
            self.stop_timer();
        }
        Ok(moved)
    }

    /// Start auto-advance. No-op on the last bar.
    pub fn play(&mut self, now: Instant) -> Result<bool, ChartError> {
        self.ensure_active()?;

        if self.cursor >= self.last_index() {
            return Ok(false);
        }
        let deadline = self
            .schedule(now, self.speed)
            .ok_or(ChartError::InvalidSpeed(self.speed))?;
        self.phase = ReplayPhase::Playing;
        self.deadline = Some(deadline);
        info!("{} replay playing at {}x", self.key, self.speed);
        Ok(true)
    }

    pub fn pause(&mut self) -> Result<(), ChartError> {
        self.ensure_active()?;

        if self.is_playing() {
            self.stop_timer();
            info!("{} replay paused at {}", self.key, self.cursor);
        }
        Ok(())
    }

    fn stop_timer(&mut self) {
        self.phase = ReplayPhase::Paused;
        self.deadline = None;
    }

    /// Jump to any bar of the snapshot
    pub fn seek(&mut self, index: usize) -> Result<(), ChartError> {
        self.ensure_active()?;

        if index >= self.snapshot.len() {
            return Err(ChartError::IndexOutOfRange {
                index,
                len: self.snapshot.len(),
            });
        }
        self.cursor = index;
        if self.cursor == self.last_index() && self.is_playing() {
            self.stop_timer();
        }
        Ok(())
    }

    /// Change the speed multiplier; a running timer is rescheduled.
    ///
    /// Speeds whose tick period cannot be represented are rejected.
    pub fn set_speed(&mut self, speed: f64, now: Instant) -> Result<(), ChartError> {
        self.ensure_active()?;

        if !speed.is_finite() || speed <= 0.0 {
            return Err(ChartError::InvalidSpeed(speed));
        }
        let deadline = self
            .schedule(now, speed)
            .ok_or(ChartError::InvalidSpeed(speed))?;
        self.speed = speed;
        if self.is_playing() {
            self.deadline = Some(deadline);
        }
        Ok(())
    }

    /// Leave replay; returns whether it was active
    pub fn exit(&mut self) -> bool {
        let was_active = self.is_active();
        self.phase = ReplayPhase::Inactive;
        self.snapshot = Vec::new();
        self.indicators = IndicatorSet::new(IndicatorConfig::empty());
        self.cursor = 0;
        self.deadline = None;
        if was_active {
            info!("{} replay exited", self.key);
        }
        was_active
    }

    /// Auto-play tick period: `max(base / speed, floor)`
    pub fn interval(&self) -> Duration {
        scaled_interval(self.base_interval, self.floor, self.speed).unwrap_or(self.base_interval)
    }

    fn schedule(&self, now: Instant, speed: f64) -> Option<Instant> {
        let interval = scaled_interval(self.base_interval, self.floor, speed)?;
        now.checked_add(interval)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fire the auto-play timer if due. Returns whether the cursor moved.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if self.is_playing() && deadline <= now => {}
            _ => return false,
        }

        let moved = self.step().unwrap_or(false);
        if self.is_playing() {
            match self.schedule(now, self.speed) {
                Some(deadline) => self.deadline = Some(deadline),
                None => self.stop_timer(),
            }
        }
        moved
    }
}

fn scaled_interval(base: Duration, floor: Duration, speed: f64) -> Option<Duration> {
    let scaled = Duration::try_from_secs_f64(base.as_secs_f64() / speed).ok()?;
    Some(scaled.max(floor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::fixtures::daily_bars;
    use crate::trader::constant::{Exchange, Interval};

    fn key() -> ChartKey {
        ChartKey::new("SYM", Exchange::Nse, Interval::Daily)
    }

    fn entered(count: usize) -> ReplayController {
        let mut replay = ReplayController::new(key(), Duration::from_millis(1000), Duration::from_millis(50));
        replay.enter(&daily_bars(&key(), count), IndicatorConfig::default()).unwrap();
        replay
    }

    #[test]
    fn test_enter_requires_bars() {
        let mut replay = ReplayController::new(key(), Duration::from_millis(1000), Duration::from_millis(50));
        assert_eq!(
            replay.enter(&[], IndicatorConfig::default()),
            Err(ChartError::EmptyStore(key()))
        );
        assert_eq!(replay.step(), Err(ChartError::ReplayInactive(key())));
        assert!(replay.state().is_none());
    }

    #[test]
    fn test_step_stops_at_last_bar() {
        let mut replay = entered(10);
        assert_eq!(replay.phase(), ReplayPhase::Armed);
        assert_eq!(replay.visible_bars().len(), 1);

        let now = Instant::now();
        assert!(replay.play(now).unwrap());
        for _ in 0..9 {
            assert!(replay.step().unwrap());
        }
        assert!(!replay.step().unwrap());

        let state = replay.state().unwrap();
        assert_eq!(state.cursor_index, 9);
        assert!(!state.playing);
        assert_eq!(replay.visible_bars().len(), 10);
        assert_eq!(replay.deadline(), None);
    }

    #[test]
    fn test_play_on_last_bar_is_noop() {
        let mut replay = entered(3);
        replay.seek(2).unwrap();
        assert!(!replay.play(Instant::now()).unwrap());
        assert!(!replay.is_playing());
    }

    #[test]
    fn test_timer_auto_pauses_on_last_bar() {
        let mut replay = entered(4);
        let start = Instant::now();
        replay.play(start).unwrap();

        // Not due yet
        assert!(!replay.on_timer(start));

        let mut now = start;
        let mut ticks = 0;
        while replay.is_playing() {
            now += replay.interval();
            assert!(replay.on_timer(now));
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(replay.state().map(|s| s.cursor_index), Some(3));
        assert_eq!(replay.phase(), ReplayPhase::Paused);
    }

    #[test]
    fn test_speed_and_interval_floor() {
        let mut replay = entered(5);
        let now = Instant::now();
        assert_eq!(replay.interval(), Duration::from_millis(1000));

        replay.set_speed(4.0, now).unwrap();
        assert_eq!(replay.interval(), Duration::from_millis(250));

        replay.set_speed(100.0, now).unwrap();
        assert_eq!(replay.interval(), Duration::from_millis(50));

        assert_eq!(replay.set_speed(0.0, now), Err(ChartError::InvalidSpeed(0.0)));
        assert!(replay.set_speed(f64::NAN, now).is_err());

        replay.play(now).unwrap();
        replay.set_speed(2.0, now).unwrap();
        assert_eq!(replay.deadline(), Some(now + Duration::from_millis(500)));
    }

    #[test]
    fn test_unrepresentable_speed_is_rejected() {
        let mut replay = entered(5);
        let now = Instant::now();
        replay.play(now).unwrap();
        replay.set_speed(2.0, now).unwrap();

        assert_eq!(replay.set_speed(1e-300, now), Err(ChartError::InvalidSpeed(1e-300)));
        assert!(replay.set_speed(f64::MIN_POSITIVE, now).is_err());

        // The previous speed and timer stay in place
        assert_eq!(replay.state().map(|s| s.speed_multiplier), Some(2.0));
        assert_eq!(replay.deadline(), Some(now + Duration::from_millis(500)));
        assert!(replay.is_playing());

        // Very fast replay is capped by the floor
        replay.set_speed(1e300, now).unwrap();
        assert_eq!(replay.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_seek_validates_index() {
        let mut replay = entered(5);
        replay.seek(3).unwrap();
        assert_eq!(replay.visible_bars().len(), 4);
        assert_eq!(
            replay.seek(5),
            Err(ChartError::IndexOutOfRange { index: 5, len: 5 })
        );
    }

    #[test]
    fn test_exit_clears_state() {
        let mut replay = entered(5);
        replay.play(Instant::now()).unwrap();
        assert!(replay.exit());
        assert!(!replay.exit());
        assert_eq!(replay.phase(), ReplayPhase::Inactive);
        assert_eq!(replay.deadline(), None);
        assert_eq!(replay.snapshot_len(), 0);
    }

    #[test]
    fn test_snapshot_indicators_cover_snapshot() {
        let replay = entered(30);
        for (_, series) in replay.indicators().lines() {
            assert_eq!(series.len(), 30);
        }
    }
}
