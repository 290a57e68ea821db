//! Chart Engine - Headless Application Entry Point
//!
//! Opens one chart against the configured market data service and logs its
//! state until interrupted.
//!
//! Usage: `chart_engine_app [SYMBOL] [EXCHANGE]`

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use chart_engine::chart::{ChartPreferences, ChartRuntime, EngineConfig, MemoryRenderer};
use chart_engine::trader::{
    exchange_today, init_logger, BaseDatafeed, ChartKey, DateRange, Exchange, RestDatafeed,
    Settings, SnapshotFeed, SETTINGS,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logger();
    info!("chart engine starting");

    let mut args = std::env::args().skip(1);
    let symbol = args.next().unwrap_or_else(|| "SBIN".to_string());
    let exchange: Exchange = match args.next() {
        Some(code) => code.parse()?,
        None => Exchange::Nse,
    };

    let config = EngineConfig::from_settings(&SETTINGS);
    // Chart preferences live only as long as this session
    let session = Arc::new(Settings::in_memory());
    let preferences = ChartPreferences::load(&session);

    let datafeed = RestDatafeed::from_settings(&SETTINGS)?;
    datafeed.init().await?;
    let datafeed: Arc<dyn BaseDatafeed> = Arc::new(datafeed);

    let (mut runtime, handle) = ChartRuntime::new(config, session, datafeed);

    if let Some(feed) = SnapshotFeed::from_settings(&SETTINGS) {
        let (sender, receiver) = mpsc::unbounded_channel();
        runtime = runtime.with_snapshots(receiver);
        tokio::spawn(async move {
            if let Err(e) = feed.run(sender).await {
                warn!("snapshot channel stopped: {}", e);
            }
        });
    }

    let runtime_task = tokio::spawn(runtime.run());

    let key = ChartKey::new(symbol, exchange, preferences.interval);
    let today = exchange_today(exchange);
    let range = preferences.range.unwrap_or_else(|| DateRange::new(today, today));
    let renderer = MemoryRenderer::new();
    handle
        .open_chart(key.clone(), range, Box::new(renderer.clone()))
        .await?;

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                if let Some(chart) = handle.info(key.clone()).await? {
                    info!(
                        "{} {:?} bars={} history={:?} live={} candles={}",
                        chart.key,
                        chart.status,
                        chart.bar_count,
                        chart.history,
                        chart.live,
                        renderer.candles().len()
                    );
                    if let Some(visible) = chart.visible {
                        info!(
                            "bars {}..={} price {:.2}..{:.2} volume up to {:.0}",
                            visible.first_index,
                            visible.last_index,
                            visible.price.0,
                            visible.price.1,
                            visible.volume.1
                        );
                    }
                }
            }
        }
    }

    let preferences = handle.preferences().await?;
    info!(
        "session ended on {} with {} indicators",
        preferences.interval,
        preferences.indicators.enabled().count()
    );

    handle.shutdown();
    runtime_task.await?;
    info!("chart engine stopped");
    Ok(())
}
