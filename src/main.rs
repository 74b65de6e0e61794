// =============================================================================
// Fusion Alpha — Main Entry Point
// =============================================================================
//
// Startup order: environment, tracing, config (validated, fatal on error),
// application context, scheduled tasks, HTTP/WebSocket API.  Ctrl-C stops
// the scheduler and waits for in-flight jobs before exiting.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod alpha;
mod api;
mod app_state;
mod cache;
mod events;
mod feeds;
mod goal;
mod indicators;
mod market_data;
mod mtf;
mod persistence;
mod regime;
mod runtime_config;
mod scheduler;
mod side_inputs;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppContext;
use crate::runtime_config::AppConfig;

/// How often the goal engine checks for a month boundary.
const GOAL_ROLLOVER_CHECK: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Fusion Alpha — Starting Up                        ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("FUSION_CONFIG").unwrap_or_else(|_| "fusion_config.json".to_string());
    let mut config = AppConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        let defaults = AppConfig::default();
        if !std::path::Path::new(&config_path).exists() {
            match defaults.save(&config_path) {
                Ok(()) => info!(path = %config_path, "Default config written"),
                Err(e) => warn!(error = %e, "Failed to write default config"),
            }
        }
        defaults
    });
    config.apply_env_overrides();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration — refusing to start");
        return Err(e).context("configuration rejected");
    }

    info!(
        symbols = ?config.symbols,
        feeds = config.enabled_feeds().count(),
        target_pct = config.goal.monthly_target_pct,
        "Configuration loaded"
    );

    // ── 2. Build shared context ──────────────────────────────────────────
    let ctx = Arc::new(AppContext::build(config)?);

    // ── 3. Schedule tasks ────────────────────────────────────────────────
    spawn_tasks(&ctx);

    // ── 4. Start the API server ──────────────────────────────────────────
    let bind_addr = ctx.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(ctx.clone());
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("Fusion Alpha is running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received — stopping tasks");

    ctx.scheduler.shutdown().await;
    server.abort();

    info!("Fusion Alpha stopped");
    Ok(())
}

/// Register every periodic job with the scheduler.
fn spawn_tasks(ctx: &Arc<AppContext>) {
    let scheduler = ctx.scheduler.clone();
    let config = &ctx.config;

    // ── Feed pollers, staggered ──────────────────────────────────────────
    for (i, feed) in ctx.aggregator.feeds().iter().enumerate() {
        let c = ctx.clone();
        let feed = feed.clone();
        let delay = Duration::from_millis(config.fusion.stagger_ms * i as u64);
        scheduler.spawn_periodic(
            format!("feed:{}", feed.id()),
            feed.config().interval(),
            delay,
            move || {
                let c = c.clone();
                let feed = feed.clone();
                async move { c.aggregator.poll_feed(&feed).await }
            },
        );
    }

    // ── Fusion ───────────────────────────────────────────────────────────
    let c = ctx.clone();
    scheduler.spawn_periodic(
        "fusion",
        Duration::from_millis(config.fusion.cycle_ms),
        Duration::from_millis(config.fusion.cycle_ms),
        move || {
            let c = c.clone();
            async move {
                c.aggregator.fuse_all();
                Ok(())
            }
        },
    );

    // ── Side inputs ──────────────────────────────────────────────────────
    if let Some(provider) = &ctx.side_provider {
        let s = &config.side_inputs;

        let p = provider.clone();
        scheduler.spawn_periodic(
            "side:funding",
            Duration::from_secs(s.funding_interval_secs),
            Duration::ZERO,
            move || {
                let p = p.clone();
                async move { p.refresh_funding().await }
            },
        );

        let p = provider.clone();
        scheduler.spawn_periodic(
            "side:sentiment",
            Duration::from_secs(s.sentiment_interval_secs),
            Duration::ZERO,
            move || {
                let p = p.clone();
                async move { p.refresh_sentiment().await }
            },
        );

        let p = provider.clone();
        scheduler.spawn_periodic(
            "side:orderbook",
            Duration::from_secs(s.orderbook_interval_secs),
            Duration::ZERO,
            move || {
                let p = p.clone();
                async move { p.refresh_depth().await }
            },
        );

        let p = provider.clone();
        scheduler.spawn_periodic(
            "side:whale",
            Duration::from_secs(s.whale_interval_secs),
            Duration::ZERO,
            move || {
                let p = p.clone();
                async move { p.refresh_whale().await }
            },
        );
    }

    // ── Candles & features ───────────────────────────────────────────────
    let c = ctx.clone();
    scheduler.spawn_periodic(
        "klines",
        Duration::from_secs(config.timeframes.kline_refresh_secs),
        Duration::ZERO,
        move || {
            let c = c.clone();
            async move { c.klines.refresh(&c.config.symbols).await }
        },
    );

    let c = ctx.clone();
    scheduler.spawn_periodic(
        "features",
        Duration::from_secs(config.timeframes.feature_interval_secs),
        Duration::from_secs(5),
        move || {
            let c = c.clone();
            async move {
                c.run_feature_cycle();
                Ok(())
            }
        },
    );

    let c = ctx.clone();
    scheduler.spawn_periodic(
        "cache:sweep",
        Duration::from_secs(config.cache.sweep_interval_secs),
        Duration::from_secs(config.cache.sweep_interval_secs),
        move || {
            let c = c.clone();
            async move {
                c.cache.sweep();
                Ok(())
            }
        },
    );

    // ── Market conditions ────────────────────────────────────────────────
    let c = ctx.clone();
    scheduler.spawn_periodic(
        "market",
        Duration::from_secs(config.market.analysis_interval_secs),
        Duration::from_secs(config.market.analysis_interval_secs),
        move || {
            let c = c.clone();
            async move {
                c.market.run_cycle(&c.bus);
                Ok(())
            }
        },
    );

    // ── Goal & Alpha ─────────────────────────────────────────────────────
    let c = ctx.clone();
    scheduler.spawn_periodic("goal:rollover", GOAL_ROLLOVER_CHECK, GOAL_ROLLOVER_CHECK, move || {
        let c = c.clone();
        async move {
            if let Some(archive) = c.goal.roll_over(Utc::now().date_naive()) {
                info!(
                    year = archive.year,
                    month = archive.month,
                    achieved = archive.achieved,
                    "Month archived"
                );
            }
            Ok(())
        }
    });

    let c = ctx.clone();
    scheduler.spawn_triggered(
        "alpha",
        ctx.alpha.interval(),
        Duration::ZERO,
        ctx.alpha.trigger(),
        move || {
            let c = c.clone();
            async move {
                c.goal.roll_over(Utc::now().date_naive());
                c.alpha.run_cycle();
                Ok(())
            }
        },
    );

    info!(tasks = scheduler.health().len(), "Scheduled tasks registered");
}
