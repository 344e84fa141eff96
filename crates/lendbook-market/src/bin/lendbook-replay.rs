//! Replay an operation log through a book actor.
//!
//! ```text
//! lendbook-replay [FILE]
//! ```
//!
//! Reads `{"market": {...}, "operations": [...]}` from FILE (or stdin),
//! prints every event as one JSON line on stdout and finishes with the hex
//! state digest. Logs go to stderr; set `RUST_LOG` to adjust and
//! `LENDBOOK_LOG_JSON=1` for JSON logs.

use std::io::Read;

use lendbook_engine::Operation;
use lendbook_market::MarketController;
use lendbook_types::{EngineConfig, MarketConfig, Result};
use serde::Deserialize;
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ReplayInput {
    market: MarketConfig,
    operations: Vec<Operation>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LENDBOOK_LOG_JSON").is_ok_and(|v| v == "1") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_input() -> Result<ReplayInput> {
    let raw = match std::env::args().nth(1) {
        Some(path) if path != "-" => std::fs::read_to_string(path)?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let input: ReplayInput = serde_json::from_str(&raw)?;
    input.market.validate()?;
    Ok(input)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let input = read_input()?;
    let key = input.market.key();

    let mut controller = MarketController::new(EngineConfig {
        event_channel_capacity: input.operations.len().saturating_mul(8).max(1_024),
        ..EngineConfig::default()
    });
    let mut events = controller.subscribe();
    let book = controller.create_order_book(input.market)?;

    let mut rejected = 0usize;
    for (index, operation) in input.operations.into_iter().enumerate() {
        if let Err(err) = book.execute(operation).await {
            rejected += 1;
            tracing::warn!(index, error = %err, "Operation rejected");
        }
        loop {
            match events.try_recv() {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event stream lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    let digest = book.state_digest().await?;
    drop(book);
    controller.shutdown().await?;

    tracing::info!(market = %key, rejected, "Replay finished");
    println!("{}", hex::encode(digest));
    Ok(())
}
