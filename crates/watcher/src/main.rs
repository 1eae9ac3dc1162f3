use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sitewatch_core::cycle::run_and_notify;
use sitewatch_core::detect::DetectionEngine;
use sitewatch_core::dispatch::{ChatTransport, Dispatcher, DispatcherConfig};
use sitewatch_core::gate::CycleGate;
use sitewatch_core::mailbox::FsSignalMailbox;
use sitewatch_core::restart::{LoopExit, RestartWatch};
use sitewatch_core::now_ms;
use sitewatch_core::store::FsSnapshotStore;
use sitewatch_core::window::offset_from_hours;
use tokio::signal;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod bridge;
mod config;
mod html;
mod source;

use bridge::BridgeTransport;
use config::{default_snapshot_path, SourceConfig, WatcherConfig};
use html::HtmlListExtractor;
use source::HttpPageFetcher;

#[derive(Debug, Parser)]
#[command(name = "sitewatch-watcher", version, about = "Watches a document list and relays changes to a chat")]
struct Cli {
    /// Page to monitor. Without it the watcher only handles restart signals.
    #[arg(long, env = "SITEWATCH_SOURCE_URL")]
    source_url: Option<String>,

    /// CSS selector matching one element per listed document.
    #[arg(long, env = "SITEWATCH_ITEM_SELECTOR", default_value = "#blocoPublicacoes li.pdf a")]
    item_selector: String,

    /// Attribute of the item element used as its identity.
    #[arg(long, env = "SITEWATCH_ID_ATTR", default_value = "href")]
    id_attr: String,

    /// CSS selector, relative to the item, holding its date.
    #[arg(long, env = "SITEWATCH_DATE_SELECTOR", default_value = "span")]
    date_selector: String,

    /// Name of the source used in notifications.
    #[arg(long, env = "SITEWATCH_LABEL", default_value = "Publications")]
    label: String,

    /// Defaults to data/<label>.snapshot.json.
    #[arg(long, env = "SITEWATCH_SNAPSHOT_PATH")]
    snapshot_path: Option<PathBuf>,

    #[arg(long, env = "SITEWATCH_SIGNAL_PATH", default_value = "data/restart-pending.json")]
    signal_path: PathBuf,

    /// Base URL of the chat bridge.
    #[arg(long, env = "SITEWATCH_BRIDGE_URL", default_value = "http://127.0.0.1:3000")]
    bridge_url: String,

    /// Monitored group chat: receives notifications and restart announcements.
    #[arg(long, env = "SITEWATCH_PRIMARY_CHAT", default_value = "120363132077830172@g.us")]
    primary_chat: String,

    #[arg(long, env = "SITEWATCH_STATUS_KEYWORD", default_value = "status")]
    status_keyword: String,

    #[arg(long, env = "SITEWATCH_DETECT_INTERVAL_SECS", default_value_t = 300)]
    detect_interval_secs: u64,

    #[arg(long, env = "SITEWATCH_SIGNAL_POLL_SECS", default_value_t = 15)]
    signal_poll_secs: u64,

    #[arg(long, env = "SITEWATCH_EVENT_POLL_MS", default_value_t = 2000)]
    event_poll_ms: u64,

    /// Minimum time before an identical notification is sent again.
    #[arg(long, env = "SITEWATCH_COOLDOWN_SECS", default_value_t = 120)]
    cooldown_secs: u64,

    #[arg(long, env = "SITEWATCH_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    fetch_timeout_secs: u64,

    /// Delay between the restart announcement and process exit.
    #[arg(long, env = "SITEWATCH_EXIT_DELAY_MS", default_value_t = 1000)]
    exit_delay_ms: u64,

    /// Fixed UTC offset used when displaying times, in hours.
    #[arg(long, env = "SITEWATCH_UTC_OFFSET_HOURS", default_value_t = -3, allow_hyphen_values = true)]
    utc_offset_hours: i32,

    /// Bridge readiness checks before giving up at startup.
    #[arg(long, env = "SITEWATCH_READY_ATTEMPTS", default_value_t = 10)]
    ready_attempts: u32,

    #[arg(long, env = "SITEWATCH_READY_RETRY_SECS", default_value_t = 3)]
    ready_retry_secs: u64,

    /// Log filter directive, e.g. `info` or `sitewatch_core=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

impl Cli {
    fn into_config(self) -> WatcherConfig {
        let fetch_timeout = Duration::from_secs(self.fetch_timeout_secs.max(1));
        let source = self.source_url.map(|url| SourceConfig {
            url,
            item_selector: self.item_selector,
            id_attr: self.id_attr,
            date_selector: self.date_selector,
            snapshot_path: self
                .snapshot_path
                .unwrap_or_else(|| default_snapshot_path(&self.label)),
            fetch_timeout,
        });
        WatcherConfig {
            source,
            label: self.label,
            signal_path: self.signal_path,
            bridge_url: self.bridge_url,
            primary_chat: self.primary_chat,
            status_keyword: self.status_keyword,
            detect_interval: Duration::from_secs(self.detect_interval_secs.max(1)),
            signal_poll_interval: Duration::from_secs(self.signal_poll_secs.max(1)),
            event_poll_interval: Duration::from_millis(self.event_poll_ms.max(100)),
            cooldown: Duration::from_secs(self.cooldown_secs),
            exit_delay: Duration::from_millis(self.exit_delay_ms),
            utc_offset_hours: self.utc_offset_hours,
            ready_attempts: self.ready_attempts.max(1),
            ready_retry_delay: Duration::from_secs(self.ready_retry_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::new(&cli.log))
        .with(fmt::layer().with_target(false))
        .init();

    let config = cli.into_config();
    info!(?config, "starting watcher");

    let transport: Arc<dyn ChatTransport> = Arc::new(
        BridgeTransport::new(&config.bridge_url, Duration::from_secs(30)).context("build bridge client")?,
    );
    wait_until_ready(transport.as_ref(), config.ready_attempts, config.ready_retry_delay).await?;

    match &config.source {
        Some(source) => start_detection(&config, source, transport.clone())?,
        None => info!("no source configured; handling restart signals only"),
    }

    run_signal_loop(&config, transport.as_ref()).await
}

async fn wait_until_ready(transport: &dyn ChatTransport, attempts: u32, delay: Duration) -> Result<()> {
    for attempt in 1..=attempts {
        if transport.is_ready().await {
            info!("chat bridge connected");
            return Ok(());
        }
        warn!(attempt, attempts, "chat bridge not ready yet");
        if attempt < attempts {
            sleep(delay).await;
        }
    }
    bail!("chat bridge not ready after {attempts} attempts")
}

fn start_detection(config: &WatcherConfig, source: &SourceConfig, transport: Arc<dyn ChatTransport>) -> Result<()> {
    let fetcher = HttpPageFetcher::new(&source.url, source.fetch_timeout).context("build http client")?;
    let extractor = HtmlListExtractor::new(&source.item_selector, &source.id_attr, &source.date_selector)?;
    let engine = Arc::new(DetectionEngine::new(
        Arc::new(fetcher),
        Arc::new(extractor),
        Arc::new(FsSnapshotStore::new(&source.snapshot_path)),
    ));

    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(DispatcherConfig {
        primary_recipient: config.primary_chat.clone(),
        label: config.label.clone(),
        cooldown_ms: config.cooldown.as_millis() as i64,
        status_keyword: config.status_keyword.clone(),
        display_offset: offset_from_hours(config.utc_offset_hours),
    })));

    info!(url = %source.url, snapshot = %source.snapshot_path.display(), "monitoring source");
    spawn_detection_loop(engine, dispatcher.clone(), transport.clone(), config.detect_interval);
    spawn_event_loop(dispatcher, transport, config.event_poll_interval);
    Ok(())
}

fn spawn_detection_loop(
    engine: Arc<DetectionEngine>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    transport: Arc<dyn ChatTransport>,
    every: Duration,
) {
    let gate = CycleGate::new();
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            // First tick is immediate.
            tick.tick().await;
            let Some(permit) = gate.try_enter() else {
                info!("previous detection cycle still running; skipping tick");
                continue;
            };
            let (engine, dispatcher, transport) = (engine.clone(), dispatcher.clone(), transport.clone());
            tokio::spawn(async move {
                let _permit = permit;
                detection_cycle(&engine, &dispatcher, transport.as_ref()).await;
            });
        }
    });
}

async fn detection_cycle(engine: &DetectionEngine, dispatcher: &Mutex<Dispatcher>, transport: &dyn ChatTransport) {
    match run_and_notify(engine, dispatcher, transport, now_ms()).await {
        Ok(_) => {}
        Err(e) if e.is_structural() => error!(error = %e, "detection cycle failed; check the item selector"),
        Err(e) => warn!(error = %e, "detection cycle failed"),
    }
}

fn spawn_event_loop(dispatcher: Arc<Mutex<Dispatcher>>, transport: Arc<dyn ChatTransport>, every: Duration) {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let events = match transport.poll_events().await {
                Ok(events) => events,
                Err(e) => {
                    debug!(error = %e, "event poll failed");
                    continue;
                }
            };
            for event in events {
                let reply = dispatcher.lock().await.handle_inbound(&event);
                let Some(text) = reply else {
                    continue;
                };
                match transport.send_text(&event.chat_id, &text).await {
                    Ok(()) => info!(chat = %event.chat_id, "status reply sent"),
                    Err(e) => warn!(error = %e, "status reply failed"),
                }
            }
        }
    });
}

async fn run_signal_loop(config: &WatcherConfig, transport: &dyn ChatTransport) -> Result<()> {
    let mailbox = FsSignalMailbox::new(&config.signal_path);
    let mut watch = RestartWatch::new(config.primary_chat.clone());
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    match watch
        .run(&mailbox, transport, config.signal_poll_interval, config.exit_delay, shutdown)
        .await
    {
        LoopExit::Restart(restart) => info!(reason = %restart.reason, "restarting onto new version"),
        LoopExit::Shutdown => {}
    }
    Ok(())
}
