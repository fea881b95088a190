//! Market Feed - demo client
//!
//! Connects a session to a simulated feed, assembles a one-minute candle
//! snapshot for the configured window, listens to a few live quotes and prints
//! the dispatch metrics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use rust_decimal::Decimal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_feed::time::{now_millis, to_iso};
use market_feed::{Candle, Config, EventKind, InMemoryTransport, MarketEvent, Quote, Session};

const MINUTE_MS: u64 = 60_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!(
        address = %config.address,
        symbols = ?config.symbols,
        snapshot_symbol = %config.snapshot_symbol,
        from = %to_iso(config.snapshot_from),
        to = %to_iso(config.snapshot_to),
        "Starting market feed demo"
    );

    // Start health check server
    if let Some(addr) = config.metrics_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = start_health_server(&addr).await {
                warn!(error = %e, "Health server error");
            }
        });
    }

    let transport = Arc::new(InMemoryTransport::new());
    transport.extend_history(synthetic_candles(
        &config.snapshot_symbol,
        config.snapshot_from.saturating_sub(10 * MINUTE_MS),
        config.snapshot_to + 10 * MINUTE_MS,
    ));

    let session = Session::connect(transport.clone(), &config.address, &config)?;

    // Candle snapshot
    let candles = session
        .time_series::<Candle>(
            &config.snapshot_symbol,
            config.snapshot_from,
            config.snapshot_to,
            config.snapshot_timeout(),
        )
        .await??;

    info!(
        symbol = %config.snapshot_symbol,
        count = candles.len(),
        newest = ?candles.first().map(|c| to_iso(c.time)),
        oldest = ?candles.last().map(|c| to_iso(c.time)),
        "Candle snapshot received"
    );
    if let Some(newest) = candles.first() {
        info!(candle = %serde_json::to_string(newest)?, "Newest candle");
    }

    // Live quotes
    let channel = session.subscribe(&[EventKind::Quote])?;
    channel.add_symbols(config.symbols.iter().cloned())?;

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    channel.on::<Quote, _>(move |quote| {
        counter.fetch_add(1, Ordering::SeqCst);
        info!(
            symbol = %quote.symbol,
            bid = %quote.bid_price,
            ask = %quote.ask_price,
            mid = ?quote.mid_price(),
            "Quote"
        );
    });

    let mut published = 0;
    for (i, symbol) in config.symbols.iter().cycle().take(config.symbols.len() * 3).enumerate() {
        published += transport.publish(synthetic_quote(symbol, i as i64)).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while received.load(Ordering::SeqCst) < published && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    channel.on_event().drain().await;
    if received.load(Ordering::SeqCst) < published {
        warn!(
            published,
            received = received.load(Ordering::SeqCst),
            "Not every quote was observed"
        );
    }

    session.close().await;
    drop(channel);

    if config.metrics_addr.is_some() {
        info!("Demo finished, serving metrics until Ctrl-C");
        tokio::signal::ctrl_c().await?;
    }

    info!(metrics = %market_feed::metrics::render(), "Shutting down");
    Ok(())
}

/// Serve `/health` and `/metrics`
async fn start_health_server(addr: &str) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting health check server");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "market-feed",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    market_feed::metrics::render()
}

/// One-minute candles covering `[from, to]`
fn synthetic_candles(symbol: &str, from: u64, to: u64) -> Vec<MarketEvent> {
    let start = from - from % MINUTE_MS;
    (0..)
        .map(|i| start + i * MINUTE_MS)
        .take_while(|time| *time <= to)
        .enumerate()
        .map(|(i, time)| {
            let mut candle = Candle::new(symbol, time, 0);
            let base = Decimal::new(15_000 + (i as i64 % 17) * 5, 2);
            candle.count = 1 + i as u64 % 9;
            candle.open = base;
            candle.high = base + Decimal::new(25, 2);
            candle.low = base - Decimal::new(25, 2);
            candle.close = base + Decimal::new(5, 2);
            candle.volume = Decimal::from(1_000 + i as i64 * 10);
            candle.into()
        })
        .collect()
}

fn synthetic_quote(symbol: &str, step: i64) -> MarketEvent {
    let now = now_millis();
    let mut quote = Quote::new(symbol);
    quote.event_time = now;
    quote.bid_time = now;
    quote.ask_time = now;
    quote.bid_price = Decimal::new(10_000 + step, 2);
    quote.ask_price = Decimal::new(10_010 + step, 2);
    quote.bid_size = Decimal::from(100);
    quote.ask_size = Decimal::from(200);
    quote.into()
}
