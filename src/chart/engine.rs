//! Chart engine.
//!
//! [`ChartEngine`] is the synchronous core: an arena of open charts keyed by
//! [`ChartKey`], with every fetch tagged by a [`FetchTicket`] so results for a
//! key that has since changed are discarded. [`ChartRuntime`] drives it from a
//! single task, interleaving commands, viewport events, snapshot ticks, fetch
//! completions and timers. [`ChartHandle`] is the command side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::config::{ChartPreferences, EngineConfig};
use super::error::ChartError;
use super::indicator::IndicatorConfig;
use super::render::{RenderAdapter, ViewportEvent, ViewportListener};
use super::replay::ReplayState;
use super::widget::{ChartInfo, ChartWidget};
use crate::trader::datafeed::{BaseDatafeed, DatafeedError};
use crate::trader::object::{BarData, ChartKey, DateRange, HistoryRequest, SessionSnapshot};
use crate::trader::setting::Settings;
use crate::trader::utility::exchange_today;

/// Upper bound on how long the runtime sleeps without a timer
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Why a fetch was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    Initial,
    Live,
    History,
}

/// Identity of an in-flight fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub key: ChartKey,
    pub generation: u64,
    pub purpose: FetchPurpose,
}

/// A fetch the runtime should perform
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub ticket: FetchTicket,
    pub request: HistoryRequest,
    /// Ask the backend to resync from the broker before querying
    pub resync: bool,
}

/// Replay transitions addressed to one chart
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplayAction {
    Enter,
    Step,
    Play,
    Pause,
    Seek(usize),
    SetSpeed(f64),
    Exit,
}

fn ticket_for(chart: &ChartWidget, purpose: FetchPurpose) -> FetchTicket {
    FetchTicket {
        key: chart.key().clone(),
        generation: chart.generation(),
        purpose,
    }
}

/// Arena of open charts
pub struct ChartEngine {
    config: EngineConfig,
    /// Session-scoped chart preferences
    preferences: Arc<Settings>,
    indicator_config: IndicatorConfig,
    charts: HashMap<ChartKey, ChartWidget>,
    next_generation: u64,
    viewport_sender: mpsc::UnboundedSender<ViewportEvent>,
}

impl ChartEngine {
    /// The indicator selection starts from what `preferences` holds
    pub fn new(
        config: EngineConfig,
        preferences: Arc<Settings>,
        viewport_sender: mpsc::UnboundedSender<ViewportEvent>,
    ) -> Self {
        let indicator_config = ChartPreferences::load(&preferences).indicators;
        Self {
            config,
            preferences,
            indicator_config,
            charts: HashMap::new(),
            next_generation: 1,
            viewport_sender,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn indicator_config(&self) -> &IndicatorConfig {
        &self.indicator_config
    }

    /// Selection, interval and range last chosen in this session
    pub fn preferences(&self) -> ChartPreferences {
        ChartPreferences::load(&self.preferences)
    }

    fn remember(&self, update: impl FnOnce(&mut ChartPreferences)) {
        let mut preferences = ChartPreferences::load(&self.preferences);
        update(&mut preferences);
        preferences.save(&self.preferences);
    }

    pub fn chart(&self, key: &ChartKey) -> Option<&ChartWidget> {
        self.charts.get(key)
    }

    pub fn info(&self, key: &ChartKey) -> Option<ChartInfo> {
        self.charts.get(key).map(ChartWidget::info)
    }

    pub fn keys(&self) -> Vec<ChartKey> {
        let mut keys: Vec<ChartKey> = self.charts.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn chart_mut(&mut self, key: &ChartKey) -> Result<&mut ChartWidget, ChartError> {
        self.charts
            .get_mut(key)
            .ok_or_else(|| ChartError::UnknownChart(key.clone()))
    }

    /// Open a chart on `renderer` and return its initial fetch.
    ///
    /// An already open chart for the same key is replaced.
    pub fn open_chart(&mut self, key: ChartKey, range: DateRange, renderer: Box<dyn RenderAdapter>) -> FetchRequest {
        if let Some(previous) = self.charts.remove(&key) {
            debug!("{} reopened, dropping previous chart", key);
            drop(previous.teardown());
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let listener = ViewportListener::new(key.clone(), self.viewport_sender.clone());
        let chart = ChartWidget::new(
            key.clone(),
            range,
            generation,
            renderer,
            listener,
            self.indicator_config.clone(),
            &self.config,
        );
        let request = FetchRequest {
            ticket: ticket_for(&chart, FetchPurpose::Initial),
            request: chart.initial_request(),
            resync: false,
        };

        info!("{} opened for {} .. {}", key, range.start, range.end);
        self.remember(|preferences| {
            preferences.interval = key.interval;
            preferences.range = Some(range);
        });
        self.charts.insert(key, chart);
        request
    }

    /// Move the chart showing `from` to a new key or date range.
    ///
    /// Everything owned by the old key is torn down; its in-flight fetches
    /// will be discarded on arrival.
    pub fn change_key(&mut self, from: &ChartKey, key: ChartKey, range: DateRange) -> Result<FetchRequest, ChartError> {
        let chart = self
            .charts
            .remove(from)
            .ok_or_else(|| ChartError::UnknownChart(from.clone()))?;
        info!("{} changing to {}", from, key);
        let renderer = chart.teardown();
        Ok(self.open_chart(key, range, renderer))
    }

    pub fn close_chart(&mut self, key: &ChartKey) -> Result<(), ChartError> {
        let chart = self
            .charts
            .remove(key)
            .ok_or_else(|| ChartError::UnknownChart(key.clone()))?;
        drop(chart.teardown());
        info!("{} closed", key);
        Ok(())
    }

    /// Merge a fetch result. Returns a follow-up fetch when an empty initial
    /// load should be retried after a broker resync.
    pub fn apply_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<BarData>, DatafeedError>,
        now: Instant,
    ) -> Option<FetchRequest> {
        let admin_resync = self.config.admin_resync;
        let Some(chart) = self.charts.get_mut(&ticket.key) else {
            debug!("{} closed, discarding {:?} fetch", ticket.key, ticket.purpose);
            return None;
        };
        if chart.generation() != ticket.generation {
            debug!(
                "{} discarding {:?} fetch of generation {} (now {})",
                ticket.key,
                ticket.purpose,
                ticket.generation,
                chart.generation()
            );
            return None;
        }

        let today = exchange_today(ticket.key.exchange);
        match (ticket.purpose, result) {
            (FetchPurpose::Initial, Ok(bars)) => {
                if bars.is_empty() && admin_resync && chart.take_resync() {
                    info!("{} empty, requesting broker resync", ticket.key);
                    return Some(FetchRequest {
                        request: chart.initial_request(),
                        ticket,
                        resync: true,
                    });
                }
                chart.load(bars, now, today);
            }
            (FetchPurpose::Initial, Err(e)) => chart.load_failed(&e, now),
            (FetchPurpose::Live, Ok(bars)) => chart.apply_live(bars),
            (FetchPurpose::Live, Err(e)) => chart.live_failed(&e),
            (FetchPurpose::History, Ok(bars)) => chart.apply_history(bars),
            (FetchPurpose::History, Err(e)) => chart.history_failed(&e),
        }
        None
    }

    /// Forward a viewport change to the history pager of its chart
    pub fn viewport_changed(&mut self, event: ViewportEvent) -> Option<FetchRequest> {
        let chart = self.charts.get_mut(&event.key)?;
        let request = chart.viewport_changed(event.range)?;
        Some(FetchRequest {
            ticket: ticket_for(chart, FetchPurpose::History),
            request,
            resync: false,
        })
    }

    /// Live polls that are due at `now`
    pub fn due_live_polls(&mut self, now: Instant) -> Vec<FetchRequest> {
        let mut requests = Vec::new();
        for chart in self.charts.values_mut() {
            let today = exchange_today(chart.key().exchange);
            if let Some(request) = chart.due_live_poll(now, today) {
                requests.push(FetchRequest {
                    ticket: ticket_for(chart, FetchPurpose::Live),
                    request,
                    resync: false,
                });
            }
        }
        requests
    }

    /// Initial loads to retry after a failure
    pub fn due_reloads(&mut self, now: Instant) -> Vec<FetchRequest> {
        let mut requests = Vec::new();
        for chart in self.charts.values_mut() {
            if let Some(request) = chart.due_reload(now) {
                requests.push(FetchRequest {
                    ticket: ticket_for(chart, FetchPurpose::Initial),
                    request,
                    resync: false,
                });
            }
        }
        requests
    }

    /// Move last candles with the prices of a session snapshot.
    /// Returns how many charts changed.
    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot, received: chrono::DateTime<chrono::Utc>) -> usize {
        let ticks = snapshot.ticks(received);
        let mut changed = 0;
        for chart in self.charts.values_mut() {
            let key = chart.key().clone();
            for tick in ticks.iter().filter(|tick| tick.matches(&key)) {
                if chart.apply_tick(tick) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Change the indicator selection of every open chart; the selection
    /// also applies to charts opened later
    pub fn set_indicator_config(&mut self, config: IndicatorConfig) {
        for chart in self.charts.values_mut() {
            chart.set_indicator_config(config.clone());
        }
        self.remember(|preferences| preferences.indicators = config.clone());
        self.indicator_config = config;
    }

    pub fn replay_enter(&mut self, key: &ChartKey) -> Result<ReplayState, ChartError> {
        self.chart_mut(key)?.replay_enter()
    }

    pub fn replay_step(&mut self, key: &ChartKey) -> Result<ReplayState, ChartError> {
        self.chart_mut(key)?.replay_step()
    }

    pub fn replay_play(&mut self, key: &ChartKey, now: Instant) -> Result<ReplayState, ChartError> {
        self.chart_mut(key)?.replay_play(now)
    }

    pub fn replay_pause(&mut self, key: &ChartKey) -> Result<ReplayState, ChartError> {
        self.chart_mut(key)?.replay_pause()
    }

    pub fn replay_seek(&mut self, key: &ChartKey, index: usize) -> Result<ReplayState, ChartError> {
        self.chart_mut(key)?.replay_seek(index)
    }

    pub fn replay_set_speed(&mut self, key: &ChartKey, speed: f64, now: Instant) -> Result<ReplayState, ChartError> {
        self.chart_mut(key)?.replay_set_speed(speed, now)
    }

    pub fn replay_exit(&mut self, key: &ChartKey, now: Instant) -> Result<(), ChartError> {
        let today = exchange_today(key.exchange);
        self.chart_mut(key)?.replay_exit(now, today)
    }

    /// Apply one replay action; `None` after a successful exit
    pub fn replay(&mut self, key: &ChartKey, action: ReplayAction, now: Instant) -> Result<Option<ReplayState>, ChartError> {
        match action {
            ReplayAction::Enter => self.replay_enter(key).map(Some),
            ReplayAction::Step => self.replay_step(key).map(Some),
            ReplayAction::Play => self.replay_play(key, now).map(Some),
            ReplayAction::Pause => self.replay_pause(key).map(Some),
            ReplayAction::Seek(index) => self.replay_seek(key, index).map(Some),
            ReplayAction::SetSpeed(speed) => self.replay_set_speed(key, speed, now).map(Some),
            ReplayAction::Exit => self.replay_exit(key, now).map(|_| None),
        }
    }

    /// Fire replay timers that are due; returns how many charts advanced
    pub fn fire_timers(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        for chart in self.charts.values_mut() {
            if chart.fire_timers(now) {
                fired += 1;
            }
        }
        fired
    }

    /// Earliest timer over all charts
    pub fn next_deadline(&self) -> Option<Instant> {
        self.charts.values().filter_map(ChartWidget::next_deadline).min()
    }
}

// ==================== Runtime ====================

/// Commands accepted by the runtime
pub enum ChartCommand {
    Open {
        key: ChartKey,
        range: DateRange,
        renderer: Box<dyn RenderAdapter>,
        reply: oneshot::Sender<()>,
    },
    ChangeKey {
        from: ChartKey,
        key: ChartKey,
        range: DateRange,
        reply: oneshot::Sender<Result<(), ChartError>>,
    },
    Close {
        key: ChartKey,
        reply: oneshot::Sender<Result<(), ChartError>>,
    },
    SetIndicators {
        config: IndicatorConfig,
        reply: oneshot::Sender<()>,
    },
    Replay {
        key: ChartKey,
        action: ReplayAction,
        reply: oneshot::Sender<Result<Option<ReplayState>, ChartError>>,
    },
    Info {
        key: ChartKey,
        reply: oneshot::Sender<Option<ChartInfo>>,
    },
    Preferences {
        reply: oneshot::Sender<ChartPreferences>,
    },
    Shutdown,
}

type FetchFuture = BoxFuture<'static, (FetchTicket, Result<Vec<BarData>, DatafeedError>)>;

async fn execute_fetch(datafeed: Arc<dyn BaseDatafeed>, fetch: FetchRequest) -> (FetchTicket, Result<Vec<BarData>, DatafeedError>) {
    if fetch.resync {
        match datafeed.resync(&fetch.request).await {
            Ok(count) => info!("{} broker resync stored {} bars", fetch.ticket.key, count),
            Err(e) => warn!("{} broker resync failed: {}", fetch.ticket.key, e),
        }
    }
    let result = datafeed.query_bar_history(&fetch.request).await;
    (fetch.ticket, result)
}

async fn next_snapshot(receiver: &mut Option<mpsc::UnboundedReceiver<SessionSnapshot>>) -> Option<SessionSnapshot> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Single-task event loop around a [`ChartEngine`]
pub struct ChartRuntime {
    engine: ChartEngine,
    datafeed: Arc<dyn BaseDatafeed>,
    commands: mpsc::UnboundedReceiver<ChartCommand>,
    viewport_events: mpsc::UnboundedReceiver<ViewportEvent>,
    snapshots: Option<mpsc::UnboundedReceiver<SessionSnapshot>>,
    fetches: FuturesUnordered<FetchFuture>,
}

impl ChartRuntime {
    pub fn new(
        config: EngineConfig,
        preferences: Arc<Settings>,
        datafeed: Arc<dyn BaseDatafeed>,
    ) -> (Self, ChartHandle) {
        let (command_sender, commands) = mpsc::unbounded_channel();
        let (viewport_sender, viewport_events) = mpsc::unbounded_channel();

        let runtime = Self {
            engine: ChartEngine::new(config, preferences, viewport_sender),
            datafeed,
            commands,
            viewport_events,
            snapshots: None,
            fetches: FuturesUnordered::new(),
        };
        (runtime, ChartHandle { sender: command_sender })
    }

    /// Feed session snapshots into open charts
    pub fn with_snapshots(mut self, snapshots: mpsc::UnboundedReceiver<SessionSnapshot>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    fn spawn_fetch(&mut self, fetch: FetchRequest) {
        debug!(
            "{} fetching {:?} {} .. {}",
            fetch.ticket.key, fetch.ticket.purpose, fetch.request.start, fetch.request.end
        );
        self.fetches
            .push(execute_fetch(self.datafeed.clone(), fetch).boxed());
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("chart runtime started");

        loop {
            let deadline = self
                .engine
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAIT);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ChartCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.viewport_events.recv() => {
                    if let Some(fetch) = self.engine.viewport_changed(event) {
                        self.spawn_fetch(fetch);
                    }
                }
                snapshot = next_snapshot(&mut self.snapshots) => match snapshot {
                    Some(snapshot) => {
                        let changed = self.engine.apply_snapshot(&snapshot, chrono::Utc::now());
                        debug!("session snapshot moved {} charts", changed);
                    }
                    None => {
                        warn!("session snapshot channel closed");
                        self.snapshots = None;
                    }
                },
                Some((ticket, result)) = self.fetches.next(), if !self.fetches.is_empty() => {
                    if let Some(fetch) = self.engine.apply_fetch(ticket, result, Instant::now()) {
                        self.spawn_fetch(fetch);
                    }
                }
                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    self.engine.fire_timers(now);
                    let due = self.engine.due_reloads(now);
                    for fetch in due.into_iter().chain(self.engine.due_live_polls(now)) {
                        self.spawn_fetch(fetch);
                    }
                }
            }
        }

        for key in self.engine.keys() {
            let _ = self.engine.close_chart(&key);
        }
        info!("chart runtime stopped");
    }

    fn handle_command(&mut self, command: ChartCommand) {
        let now = Instant::now();
        match command {
            ChartCommand::Open {
                key,
                range,
                renderer,
                reply,
            } => {
                let fetch = self.engine.open_chart(key, range, renderer);
                self.spawn_fetch(fetch);
                let _ = reply.send(());
            }
            ChartCommand::ChangeKey {
                from,
                key,
                range,
                reply,
            } => {
                let result = self
                    .engine
                    .change_key(&from, key, range)
                    .map(|fetch| self.spawn_fetch(fetch));
                let _ = reply.send(result);
            }
            ChartCommand::Close { key, reply } => {
                let _ = reply.send(self.engine.close_chart(&key));
            }
            ChartCommand::SetIndicators { config, reply } => {
                self.engine.set_indicator_config(config);
                let _ = reply.send(());
            }
            ChartCommand::Replay { key, action, reply } => {
                let _ = reply.send(self.engine.replay(&key, action, now));
            }
            ChartCommand::Info { key, reply } => {
                let _ = reply.send(self.engine.info(&key));
            }
            ChartCommand::Preferences { reply } => {
                let _ = reply.send(self.engine.preferences());
            }
            ChartCommand::Shutdown => {}
        }
    }
}

/// Cloneable command side of a [`ChartRuntime`]
#[derive(Clone)]
pub struct ChartHandle {
    sender: mpsc::UnboundedSender<ChartCommand>,
}

impl ChartHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ChartCommand,
    ) -> Result<T, ChartError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .map_err(|_| ChartError::RuntimeClosed)?;
        response.await.map_err(|_| ChartError::RuntimeClosed)
    }

    pub async fn open_chart(
        &self,
        key: ChartKey,
        range: DateRange,
        renderer: Box<dyn RenderAdapter>,
    ) -> Result<(), ChartError> {
        self.request(|reply| ChartCommand::Open {
            key,
            range,
            renderer,
            reply,
        })
        .await
    }

    /// Switch symbol, exchange, interval or date range; leaves replay
    pub async fn change_key(&self, from: ChartKey, key: ChartKey, range: DateRange) -> Result<(), ChartError> {
        self.request(|reply| ChartCommand::ChangeKey {
            from,
            key,
            range,
            reply,
        })
        .await?
    }

    pub async fn close_chart(&self, key: ChartKey) -> Result<(), ChartError> {
        self.request(|reply| ChartCommand::Close { key, reply }).await?
    }

    pub async fn set_indicator_config(&self, config: IndicatorConfig) -> Result<(), ChartError> {
        self.request(|reply| ChartCommand::SetIndicators { config, reply })
            .await
    }

    pub async fn replay(&self, key: ChartKey, action: ReplayAction) -> Result<Option<ReplayState>, ChartError> {
        self.request(|reply| ChartCommand::Replay { key, action, reply })
            .await?
    }

    pub async fn info(&self, key: ChartKey) -> Result<Option<ChartInfo>, ChartError> {
        self.request(|reply| ChartCommand::Info { key, reply }).await
    }

    pub async fn preferences(&self) -> Result<ChartPreferences, ChartError> {
        self.request(|reply| ChartCommand::Preferences { reply }).await
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(ChartCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::fixtures::{daily_bars, make_bar, minute_key, session_minute};
    use crate::chart::render::{LogicalRange, MemoryRenderer};
    use crate::chart::widget::ChartStatus;
    use crate::trader::constant::{Exchange, Interval};
    use chrono::NaiveDate;

    fn engine() -> (ChartEngine, mpsc::UnboundedReceiver<ViewportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChartEngine::new(EngineConfig::default(), Arc::new(Settings::in_memory()), tx), rx)
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        )
    }

    fn daily_key() -> ChartKey {
        ChartKey::new("SYM", Exchange::Nse, Interval::Daily)
    }

    #[test]
    fn test_results_for_old_key_are_discarded() {
        let (mut engine, _rx) = engine();
        let renderer = MemoryRenderer::new();
        let old = engine.open_chart(minute_key(), range(), Box::new(renderer.clone()));

        let new = engine
            .change_key(&minute_key(), daily_key(), range())
            .unwrap();
        assert_ne!(old.ticket.generation, new.ticket.generation);

        let stale = vec![make_bar(&minute_key(), session_minute(0), 100.0)];
        assert!(engine.apply_fetch(old.ticket, Ok(stale), Instant::now()).is_none());
        assert!(engine.chart(&minute_key()).is_none());
        assert_eq!(engine.info(&daily_key()).map(|i| i.status), Some(ChartStatus::Loading));

        engine.apply_fetch(new.ticket, Ok(daily_bars(&daily_key(), 20)), Instant::now());
        let info = engine.info(&daily_key()).unwrap();
        assert_eq!(info.status, ChartStatus::Ready);
        assert_eq!(info.bar_count, 20);
        assert_eq!(renderer.candles().len(), 20);
    }

    #[test]
    fn test_same_key_new_range_invalidates() {
        let (mut engine, _rx) = engine();
        let first = engine.open_chart(daily_key(), range(), Box::new(MemoryRenderer::new()));
        let second = engine
            .change_key(&daily_key(), daily_key(), range())
            .unwrap();

        engine.apply_fetch(first.ticket, Ok(daily_bars(&daily_key(), 5)), Instant::now());
        assert_eq!(engine.info(&daily_key()).map(|i| i.bar_count), Some(0));

        engine.apply_fetch(second.ticket, Ok(daily_bars(&daily_key(), 7)), Instant::now());
        assert_eq!(engine.info(&daily_key()).map(|i| i.bar_count), Some(7));
    }

    #[test]
    fn test_empty_load_requests_one_resync() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = EngineConfig {
            admin_resync: true,
            ..EngineConfig::default()
        };
        let mut engine = ChartEngine::new(config, Arc::new(Settings::in_memory()), tx);
        let fetch = engine.open_chart(daily_key(), range(), Box::new(MemoryRenderer::new()));

        let retry = engine
            .apply_fetch(fetch.ticket, Ok(Vec::new()), Instant::now())
            .unwrap();
        assert!(retry.resync);

        assert!(engine.apply_fetch(retry.ticket, Ok(Vec::new()), Instant::now()).is_none());
        assert_eq!(engine.info(&daily_key()).map(|i| i.status), Some(ChartStatus::NoData));
    }

    #[test]
    fn test_failed_initial_load_is_retried() {
        let (mut engine, _rx) = engine();
        let today = exchange_today(Exchange::Nse);
        let fetch = engine.open_chart(minute_key(), DateRange::new(today, today), Box::new(MemoryRenderer::new()));
        let now = Instant::now();

        let error = DatafeedError::Unavailable("down".to_string());
        assert!(engine.apply_fetch(fetch.ticket, Err(error), now).is_none());
        let info = engine.info(&minute_key()).unwrap();
        assert_eq!(info.status, ChartStatus::Degraded);
        assert!(!info.live);

        let retry_at = now + EngineConfig::default().poll_interval;
        assert_eq!(engine.next_deadline(), Some(retry_at));
        assert!(engine.due_reloads(retry_at - Duration::from_millis(1)).is_empty());

        let reloads = engine.due_reloads(retry_at);
        assert_eq!(reloads.len(), 1);
        assert_eq!(reloads[0].ticket.purpose, FetchPurpose::Initial);
        assert!(!reloads[0].resync);
        assert!(engine.due_reloads(retry_at + Duration::from_secs(600)).is_empty());

        let bars = (0..5).map(|i| make_bar(&minute_key(), session_minute(i), 100.0)).collect();
        engine.apply_fetch(reloads[0].ticket.clone(), Ok(bars), retry_at);
        let info = engine.info(&minute_key()).unwrap();
        assert_eq!(info.status, ChartStatus::Ready);
        assert_eq!(info.bar_count, 5);
        assert!(info.live);
    }

    #[test]
    fn test_snapshot_ticks_reach_only_matching_exchange() {
        let (mut engine, _rx) = engine();
        let today = exchange_today(Exchange::Nse);
        let received = chrono::Utc::now();
        let earlier = crate::trader::utility::bucket_start(received, Interval::Minute, Exchange::Nse)
            - chrono::Duration::minutes(5);

        let nse = minute_key();
        let bse = ChartKey::new("SBIN", Exchange::Bse, Interval::Minute);
        let mut renderers = Vec::new();
        for key in [&nse, &bse] {
            let renderer = MemoryRenderer::new();
            let fetch = engine.open_chart(key.clone(), DateRange::new(today, today), Box::new(renderer.clone()));
            engine.apply_fetch(fetch.ticket, Ok(vec![make_bar(key, earlier, 100.0)]), Instant::now());
            renderers.push(renderer);
        }

        let json = r#"{"prices":{"SBIN":612.5},"positions":[{"symbol":"SBIN","exchange":"BSE","quantity":5}]}"#;
        let snapshot: SessionSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(engine.apply_snapshot(&snapshot, received), 1);
        assert_eq!(renderers[0].candles().last().map(|c| c.close), Some(100.0));
        assert_eq!(renderers[1].candles().last().map(|c| c.close), Some(612.5));
    }

    #[test]
    fn test_history_page_through_viewport() {
        let (mut engine, _rx) = engine();
        let all = daily_bars(&daily_key(), 40);
        let fetch = engine.open_chart(daily_key(), range(), Box::new(MemoryRenderer::new()));
        engine.apply_fetch(fetch.ticket, Ok(all[20..].to_vec()), Instant::now());

        let event = ViewportEvent {
            key: daily_key(),
            range: LogicalRange::new(1.0, 15.0),
        };
        let page = engine.viewport_changed(event.clone()).unwrap();
        assert_eq!(page.ticket.purpose, FetchPurpose::History);
        assert!(engine.viewport_changed(event.clone()).is_none());

        // Page fully inside the loaded range
        engine.apply_fetch(page.ticket, Ok(all[25..30].to_vec()), Instant::now());
        let info = engine.info(&daily_key()).unwrap();
        assert_eq!(info.bar_count, 20);
        assert_eq!(info.history, crate::chart::history::HistoryStatus::Exhausted);
        assert!(engine.viewport_changed(event).is_none());
    }

    #[test]
    fn test_replay_through_engine() {
        let (mut engine, _rx) = engine();
        let fetch = engine.open_chart(daily_key(), range(), Box::new(MemoryRenderer::new()));
        let now = Instant::now();

        assert_eq!(
            engine.replay_enter(&daily_key()),
            Err(ChartError::EmptyStore(daily_key()))
        );
        engine.apply_fetch(fetch.ticket, Ok(daily_bars(&daily_key(), 10)), now);

        engine.replay(&daily_key(), ReplayAction::Enter, now).unwrap();
        engine.replay(&daily_key(), ReplayAction::Play, now).unwrap();
        let deadline = engine.next_deadline().unwrap();
        assert_eq!(engine.fire_timers(deadline), 1);
        assert_eq!(
            engine.info(&daily_key()).and_then(|i| i.replay).map(|r| r.cursor_index),
            Some(1)
        );

        assert_eq!(engine.replay(&daily_key(), ReplayAction::Exit, now), Ok(None));
        assert_eq!(engine.next_deadline(), None);
        assert_eq!(
            engine.replay(&minute_key(), ReplayAction::Step, now),
            Err(ChartError::UnknownChart(minute_key()))
        );
    }

    #[test]
    fn test_change_key_exits_replay() {
        let (mut engine, _rx) = engine();
        let renderer = MemoryRenderer::new();
        let fetch = engine.open_chart(daily_key(), range(), Box::new(renderer.clone()));
        engine.apply_fetch(fetch.ticket, Ok(daily_bars(&daily_key(), 10)), Instant::now());
        engine.replay_enter(&daily_key()).unwrap();

        let other = ChartKey::new("OTHER", Exchange::Nse, Interval::Daily);
        engine.change_key(&daily_key(), other.clone(), range()).unwrap();
        assert!(engine.info(&other).and_then(|i| i.replay).is_none());
        assert!(renderer.overlay_ids().is_empty());
    }

    #[test]
    fn test_indicator_toggle_survives_key_change() {
        let settings = Arc::new(Settings::in_memory());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = ChartEngine::new(EngineConfig::default(), settings.clone(), tx);
        engine.open_chart(minute_key(), range(), Box::new(MemoryRenderer::new()));

        let mut config = engine.indicator_config().clone();
        assert!(config.set_enabled("cpr", true));
        engine.set_indicator_config(config.clone());

        let later = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        );
        engine.change_key(&minute_key(), daily_key(), later).unwrap();
        assert_eq!(engine.indicator_config(), &config);

        let stored = ChartPreferences::load(&settings);
        assert_eq!(stored, engine.preferences());
        assert!(stored.indicators.get("cpr").map(|t| t.enabled).unwrap_or(false));
        assert_eq!(stored.interval, Interval::Daily);
        assert_eq!(stored.range, Some(later));

        // A new engine on the same session starts from the stored selection
        let (tx, _rx) = mpsc::unbounded_channel();
        let reopened = ChartEngine::new(EngineConfig::default(), settings, tx);
        assert_eq!(reopened.indicator_config(), &config);
    }
}
