/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running market views logged periodically, with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tickdeck_sync::{MarketView, SyncConfig, SyncServices};

#[derive(Parser, Debug)]
#[command(name = "tickdeck-sync", version, about = "Live market data sync for the tickdeck dashboard")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
    /// Seconds between market summaries
    #[arg(long = "report-interval", value_name = "SECS", default_value_t = 5)]
    report_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting tickdeck-sync"
    );

    let config = SyncConfig::from_file(&args.config_path).context("load config")?;
    info!(market_count = config.markets.len(), source = %config.source, "configuration loaded");

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let services = SyncServices::from_config(config.clone()).context("build sync services")?;

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let mut views = Vec::with_capacity(config.markets.len());
    for market in &config.markets {
        match services.start_market(market).await {
            Ok(view) => views.push(view),
            Err(err) => {
                warn!(symbol = %market.symbol, error = %err, retryable = err.is_user_retryable(), "market failed to start");
            }
        }
    }
    info!(started = views.len(), "markets started");

    report_until_shutdown(&views, Duration::from_secs(args.report_interval.max(1)), &shutdown).await;
    info!("shutdown signal received");

    drop(views);
    services.shutdown();
    info!("shutdown complete");

    Ok(())
}

async fn report_until_shutdown(views: &[MarketView], period: Duration, shutdown: &CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                for view in views {
                    let summary = view.summary();
                    info!(
                        symbol = %summary.symbol,
                        candles = summary.candles,
                        last_close = ?summary.last_close,
                        best_bid = ?summary.best_bid,
                        best_ask = ?summary.best_ask,
                        spread = ?summary.spread,
                        trades = summary.trades,
                        last_trade = ?summary.last_trade,
                        kline = ?summary.kline_state,
                        depth = ?summary.depth_state,
                        trade = ?summary.trade_state,
                        "market summary"
                    );
                }
            }
        }
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
