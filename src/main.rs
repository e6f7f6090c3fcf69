use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use signalbot::analysis::AnalysisCoordinator;
use signalbot::api::{BinanceCredentials, BinanceFuturesClient, OpenAiAnalysisProvider};
use signalbot::config::{Settings, StrategyKind};
use signalbot::coordination::{CoordinationStore, InMemoryStore, RedisStore};
use signalbot::db::{InMemoryPositionRepository, PositionRepository, PostgresPositionRepository};
use signalbot::dispatch::{
    LogPerformanceConsumer, LogSignalSink, SignalDispatcher, SignalSink, WebhookSignalSink,
};
use signalbot::execution::{OrderCleanupService, PositionMonitor};
use signalbot::market_data::MarketDataFetcher;
use signalbot::retry::RetryPolicy;
use signalbot::strategy::{
    AiAugmentedStrategy, SignalPipeline, SignalProducer, StrategyInstance, TechnicalStrategy,
};
use signalbot::venue::ExecutionVenue;
use signalbot::SignalAction;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "signalbot", about = "Multi-timeframe trading signal bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signal loop and the position monitor until Ctrl+C (default)
    Run,
    /// Produce one signal per configured strategy for a symbol and print them as JSON
    Analyze {
        #[arg(short, long)]
        symbol: String,
        /// Only run the strategy with this name
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Reconcile open positions against the venue
    Monitor {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Next wall-clock multiple of `period` (e.g. XX:00, XX:05, ... for five minutes)
fn next_boundary(period: Duration) -> Instant {
    let period_secs = period.as_secs().max(1) as i64;
    let wait = period_secs - Utc::now().timestamp().rem_euclid(period_secs);
    Instant::now() + Duration::from_secs(wait as u64)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Analyze { symbol, strategy } => analyze(settings, &symbol, strategy.as_deref()).await,
        Command::Monitor { once } => monitor(settings, once).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("signalbot=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_store(settings: &Settings) -> Arc<dyn CoordinationStore> {
    let Some(redis_url) = settings.redis_url.as_deref() else {
        tracing::warn!("No redis_url configured, analysis is coordinated within this process only");
        return Arc::new(InMemoryStore::new());
    };

    match RedisStore::new(redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), coordinating within this process only",
                e
            );
            Arc::new(InMemoryStore::new())
        }
    }
}

async fn connect_repository(settings: &Settings) -> Arc<dyn PositionRepository> {
    let Some(database_url) = settings.database_url.as_deref() else {
        tracing::warn!("No database_url configured, positions are kept in memory");
        return Arc::new(InMemoryPositionRepository::new());
    };

    match PostgresPositionRepository::new(database_url).await {
        Ok(repo) => {
            tracing::info!("Postgres persistence enabled (positions)");
            Arc::new(repo)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing with in-memory positions",
                e
            );
            Arc::new(InMemoryPositionRepository::new())
        }
    }
}

fn build_venue(settings: &Settings) -> anyhow::Result<Arc<BinanceFuturesClient>> {
    let credentials = match (&settings.venue.api_key, &settings.venue.api_secret) {
        (Some(api_key), Some(api_secret)) => Some(BinanceCredentials {
            api_key: api_key.clone(),
            api_secret: api_secret.clone(),
        }),
        _ => {
            tracing::warn!("No venue credentials, account endpoints are unavailable");
            None
        }
    };

    let client = BinanceFuturesClient::new(
        &settings.venue.base_url,
        credentials,
        Duration::from_secs(settings.venue.timeout_secs),
    )
    .map_err(|e| anyhow!("building venue client: {}", e))?;

    Ok(Arc::new(client))
}

async fn build_coordinator(settings: &Settings) -> Arc<AnalysisCoordinator> {
    let provider = OpenAiAnalysisProvider::new(
        settings.openai.api_key.clone(),
        &settings.openai.base_url,
        &settings.openai.model,
    )
    .with_retry_policy(RetryPolicy::new(
        settings.openai.max_retries,
        Duration::from_millis(500),
        2.0,
    ));

    if settings.openai.api_key.is_none() {
        tracing::warn!("No OpenAI API key, AI strategies will use technical scoring");
    }

    let store = connect_store(settings).await;
    Arc::new(AnalysisCoordinator::new(
        store,
        Arc::new(provider),
        settings.coordinator_config(),
    ))
}

/// One instance per configured strategy; `symbol` rebinds every strategy to that symbol
fn build_instances(
    settings: &Settings,
    coordinator: &Arc<AnalysisCoordinator>,
    symbol: Option<&str>,
    only: Option<&str>,
) -> Vec<StrategyInstance> {
    settings
        .strategies
        .iter()
        .filter(|s| only.map_or(true, |name| s.name == name))
        .map(|s| {
            let producer: Arc<dyn SignalProducer> = match s.kind {
                StrategyKind::Technical => Arc::new(
                    TechnicalStrategy::new(&s.name, s.timeframes.clone())
                        .with_min_candles(s.min_candles),
                ),
                StrategyKind::AiAugmented => Arc::new(
                    AiAugmentedStrategy::new(&s.name, s.timeframes.clone(), coordinator.clone())
                        .with_min_candles(s.min_candles),
                ),
            };

            StrategyInstance {
                symbol: symbol.unwrap_or(&s.symbol).to_ascii_uppercase(),
                producer,
            }
        })
        .collect()
}

fn build_pipeline(settings: &Settings, venue: &Arc<BinanceFuturesClient>) -> SignalPipeline {
    let fetcher = MarketDataFetcher::new(venue.clone())
        .with_retry_policy(settings.market_data_retry())
        .with_request_timeout(Duration::from_secs(settings.market_data.request_timeout_secs));

    SignalPipeline::new(Arc::new(fetcher))
}

fn build_sinks(settings: &Settings) -> anyhow::Result<Vec<Arc<dyn SignalSink>>> {
    let mut sinks: Vec<Arc<dyn SignalSink>> = vec![Arc::new(LogSignalSink)];

    if !settings.dispatch.webhook_urls.is_empty() {
        let webhook = WebhookSignalSink::new(
            settings.dispatch.webhook_urls.clone(),
            Duration::from_secs(settings.dispatch.webhook_timeout_secs),
        )
        .map_err(|e| anyhow!("building webhook sink: {}", e))?;
        sinks.push(Arc::new(webhook));
    }

    Ok(sinks)
}

async fn build_monitor(
    settings: &Settings,
    venue: &Arc<BinanceFuturesClient>,
) -> Arc<PositionMonitor> {
    let venue: Arc<dyn ExecutionVenue> = venue.clone();
    let venue_timeout = Duration::from_secs(settings.monitor.venue_timeout_secs);

    let cleanup = OrderCleanupService::new(venue.clone())
        .with_mode(settings.cleanup_mode())
        .with_call_timeout(venue_timeout);

    let repository = connect_repository(settings).await;

    Arc::new(
        PositionMonitor::new(
            repository,
            venue,
            cleanup,
            Arc::new(LogPerformanceConsumer::new()),
        )
        .with_venue_timeout(venue_timeout),
    )
}

// ============================================================================
// Commands
// ============================================================================

async fn run(settings: Settings) -> anyhow::Result<()> {
    tracing::info!("🚀 SignalBot starting (worker {})", settings.worker_id);

    let venue = build_venue(&settings)?;
    let coordinator = build_coordinator(&settings).await;
    let instances = build_instances(&settings, &coordinator, None, None);
    if instances.is_empty() {
        return Err(anyhow!("No strategies configured! Cannot start bot."));
    }

    let (dispatcher, dispatch_task) =
        SignalDispatcher::spawn(build_sinks(&settings)?, settings.dispatch.queue_capacity);
    let pipeline = Arc::new(build_pipeline(&settings, &venue).with_dispatcher(dispatcher));
    let monitor = build_monitor(&settings, &venue).await;

    tracing::info!("\n📊 Configuration:");
    for instance in &instances {
        tracing::info!(
            "    - {} on {} ({})",
            instance.producer.name(),
            instance.symbol,
            instance
                .producer
                .timeframes()
                .iter()
                .map(|tf| tf.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_period = Duration::from_secs(settings.analysis.signal_interval_secs);
    let poll_interval = Duration::from_secs(settings.monitor.poll_interval_secs);

    tracing::info!("\n🔄 Spawning independent loops...");

    // Loop 1: signals, clock-aligned
    let mut signal_task = {
        let pipeline = pipeline.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            signal_loop(pipeline, instances, signal_period, shutdown).await;
        })
    };

    // Loop 2: position monitor
    let mut monitor_task = {
        let monitor = monitor.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            monitor.run(poll_interval, shutdown).await;
        })
    };

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!("  📈 Signals: every {:?} (clock-aligned)", signal_period);
    tracing::info!("  👁️  Monitor: every {:?}", poll_interval);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = &mut signal_task => {
            tracing::error!("Signal loop exited: {:?}", result);
        }
        result = &mut monitor_task => {
            tracing::error!("Monitor loop exited: {:?}", result);
        }
    }

    let _ = shutdown_tx.send(true);
    for (name, task) in [("signal", signal_task), ("monitor", monitor_task)] {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!("{} loop did not stop within {:?}", name, SHUTDOWN_GRACE);
        }
    }

    // The dispatcher drains once the last pipeline handle is gone
    drop(pipeline);
    match tokio::time::timeout(SHUTDOWN_GRACE, dispatch_task).await {
        Ok(Ok(stats)) => tracing::info!(
            "📬 Dispatched {} signals ({} delivered, {} failed)",
            stats.signals,
            stats.delivered,
            stats.failed
        ),
        Ok(Err(e)) => tracing::error!("Dispatcher task failed: {}", e),
        Err(_) => tracing::warn!("Dispatcher did not drain within {:?}", SHUTDOWN_GRACE),
    }

    tracing::info!("👋 SignalBot stopped");
    Ok(())
}

async fn signal_loop(
    pipeline: Arc<SignalPipeline>,
    instances: Vec<StrategyInstance>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("📈 Signal Loop starting...");

    let start = next_boundary(period);
    tracing::info!(
        "Signal loop will start in {:?} at next boundary",
        start - Instant::now()
    );

    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::info!("📈 [SIGNALS] Tick at {}", Utc::now().format("%H:%M:%S"));

                let signals = pipeline.run_all(&instances).await;
                let actionable = signals
                    .iter()
                    .filter(|s| s.action != SignalAction::Hold)
                    .count();

                tracing::info!("  {} signals, {} actionable", signals.len(), actionable);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Signal loop stopped");
}

async fn analyze(settings: Settings, symbol: &str, only: Option<&str>) -> anyhow::Result<()> {
    let venue = build_venue(&settings)?;
    let coordinator = build_coordinator(&settings).await;
    let instances = build_instances(&settings, &coordinator, Some(symbol), only);
    if instances.is_empty() {
        return Err(anyhow!("No strategy named {:?}", only.unwrap_or_default()));
    }

    let signals = build_pipeline(&settings, &venue).run_all(&instances).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&signals).context("serializing signals")?
    );

    Ok(())
}

async fn monitor(settings: Settings, once: bool) -> anyhow::Result<()> {
    let venue = build_venue(&settings)?;
    let monitor = build_monitor(&settings, &venue).await;

    if once {
        let report = monitor.run_cycle().await;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing cycle report")?
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_interval = Duration::from_secs(settings.monitor.poll_interval_secs);
    let mut task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run(poll_interval, shutdown_rx).await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = &mut task => {
            tracing::error!("Monitor loop exited: {:?}", result);
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
    Ok(())
}
