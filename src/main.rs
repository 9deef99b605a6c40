use clap::Parser;
use signalbot::config::BotConfig;
use signalbot::db::PostgresStore;
use signalbot::decision::DecisionOrchestrator;
use signalbot::execution::{
    ExecutionAdapter, ExitMonitor, PaperExecutionAdapter, PositionManager,
};
use signalbot::market::{HttpMarketData, MarketData};
use signalbot::pipeline::{DeduplicationCache, SignalPipeline, SignalValidator};
use signalbot::store::{MemoryStore, Store};
use signalbot::Result;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(name = "signalbot", about = "Trading signal pipeline and decision engine")]
struct Args {
    /// Override the pending-signal poll interval (seconds)
    #[arg(long)]
    signal_poll_secs: Option<u64>,

    /// Override the exit monitor interval (seconds)
    #[arg(long)]
    exit_poll_secs: Option<u64>,

    /// Drain pending signals once, run one exit sweep, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let mut config = BotConfig::from_env()?;
    if let Some(secs) = args.signal_poll_secs {
        config.signal_poll_secs = secs;
    }
    if let Some(secs) = args.exit_poll_secs {
        config.exit_poll_secs = secs;
    }

    tracing::info!("🚀 SignalBot starting - Pipeline + Exit Monitor");

    // Collaborators
    let store = build_store().await?;
    let market: Arc<dyn MarketData> = Arc::new(HttpMarketData::new(
        &config.market_data_url,
        config.market_data_rpm,
    )?);
    let execution: Arc<dyn ExecutionAdapter> = Arc::new(PaperExecutionAdapter::new(
        market.clone(),
        config.paper_slippage_bps,
    ));

    // Restore open positions so the exit monitor resumes supervision
    let restored = store.fetch_open_positions().await?;
    let position_manager = Arc::new(Mutex::new(PositionManager::with_positions(restored)));

    // Core components
    let dedup = Arc::new(DeduplicationCache::new(config.dedup_window_secs));
    let validator = Arc::new(SignalValidator::new(config.validator()));
    let orchestrator = Arc::new(DecisionOrchestrator::new(config.decision(), market.clone()));

    let pipeline = Arc::new(SignalPipeline::new(
        dedup,
        validator,
        orchestrator.clone(),
        position_manager.clone(),
        execution.clone(),
        store.clone(),
        config.risk(),
    ));

    let monitor = Arc::new(ExitMonitor::new(
        orchestrator,
        market,
        position_manager,
        execution,
        store.clone(),
        config.exit_monitor(),
    ));

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Market data: {}", config.market_data_url);
    tracing::info!("  Confidence threshold: {:.0}", config.confidence_threshold);
    tracing::info!(
        "  Sizing: base ${:.0}, ceiling ${:.0}",
        config.base_position_size,
        config.max_position_size
    );
    tracing::info!(
        "  Exits: +{:.0}% target / -{:.0}% stop / {}min max hold",
        config.profit_target_pct * 100.0,
        config.stop_loss_pct * 100.0,
        config.max_hold_minutes
    );
    tracing::info!("  Dedup window: {}s, cooldown: {}s", config.dedup_window_secs, config.cooldown_secs);

    if args.once {
        drain_pending(&pipeline, store.as_ref(), config.signal_batch_size).await?;
        let alerts = monitor.sweep().await?;
        tracing::info!("Single pass complete ({} exit alert(s))", alerts.len());
        return Ok(());
    }

    tracing::info!("\n🔄 Spawning independent loops...");

    // Loop 1: pending-signal processing
    let signal_task = {
        let pipeline = pipeline.clone();
        let store = store.clone();
        let poll_secs = config.signal_poll_secs;
        let batch_size = config.signal_batch_size;
        tokio::spawn(async move {
            signal_poll_loop(pipeline, store, poll_secs, batch_size).await;
        })
    };

    // Loop 2: exit monitoring
    let exit_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            monitor.run().await;
        })
    };

    tracing::info!("✅ All loops spawned");
    tracing::info!("  📨 Signals: every {}s", config.signal_poll_secs);
    tracing::info!("  🚪 Exits: every {}s", config.exit_poll_secs);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = signal_task => {
            tracing::error!("Signal loop exited: {:?}", result);
        }
        result = exit_task => {
            tracing::error!("Exit monitor exited: {:?}", result);
        }
    }

    tracing::info!("👋 SignalBot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signalbot=info".into()),
        )
        .init();
}

/// Postgres when DATABASE_URL is set, in-memory otherwise (audit records are
/// lost on restart in that mode)
async fn build_store() -> Result<Arc<dyn Store>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PostgresStore::new(&url).await?;
            Ok(Arc::new(store))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set - using in-memory store, audit trail will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn signal_poll_loop(
    pipeline: Arc<SignalPipeline>,
    store: Arc<dyn Store>,
    poll_secs: u64,
    batch_size: usize,
) {
    let mut ticker = interval(Duration::from_secs(poll_secs));
    loop {
        ticker.tick().await;
        if let Err(e) = drain_pending(&pipeline, store.as_ref(), batch_size).await {
            tracing::error!("Signal poll failed: {e}");
        }
    }
}

/// Pull one batch of pending payloads through the pipeline. Signals that got
/// a result (success or failure) are marked processed; anything abandoned by
/// a store outage stays queued for the next poll.
async fn drain_pending(
    pipeline: &SignalPipeline,
    store: &dyn Store,
    batch_size: usize,
) -> Result<()> {
    let pending = store.fetch_pending_signals(batch_size).await?;
    if pending.is_empty() {
        return Ok(());
    }

    let payloads: Vec<serde_json::Value> = pending.iter().map(|p| p.payload.clone()).collect();
    let results = pipeline.process_signal_batch(&payloads).await;

    for (item, _result) in pending.iter().zip(results.iter()) {
        store.mark_signal_processed(item.id).await?;
    }

    let successes = results.iter().filter(|r| r.success).count();
    tracing::info!(
        "Processed {}/{} pending signal(s): {} entered, {} rejected/failed",
        results.len(),
        pending.len(),
        successes,
        results.len() - successes
    );

    Ok(())
}
