//! # briefwire
//!
//! A news enrichment pipeline that ingests normalized items from collector
//! feeds, deduplicates them into a persistent JSON store, rewrites each item
//! through an LLM, and resolves an illustration image for every story.
//!
//! ## Features
//!
//! - Identity-based deduplication: repeated ingestion of the same article
//!   across runs converges to one record with a stable id
//! - Rewrite / tag enrichment with exponential backoff on rate limits and
//!   checkpointed, resumable progress
//! - Keyword category and frequency tag inference for items the services
//!   left without authoritative values
//! - An image fallback chain (generation → stock search → local lookup →
//!   placeholder) that guarantees every record names an existing file
//! - A repair pass (`--repair`) that fixes records whose image files have
//!   gone missing, with a pre-repair backup
//!
//! ## Usage
//!
//! ```sh
//! briefwire --input news.json --store all_news.json --output enhanced_news.json
//! ```
//!
//! ## Architecture
//!
//! One pipeline run is: load store → merge raw items → save store → enrich
//! unprocessed items against the output store → final save. Items are
//! processed strictly one at a time; the store has a single writer per run.

use clap::Parser;
use std::error::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod classify;
mod cli;
mod config;
mod enhancer;
mod images;
mod models;
mod store;
mod utils;

use api::GeminiText;
use cli::Cli;
use config::Settings;
use enhancer::{Enhancer, EnhancerConfig};
use images::{GeminiImage, ImageChain, UnsplashSearch, repair_store};
use store::{NewsStore, load_raw_items};
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("briefwire starting up");

    if let Err(e) = dotenvy::dotenv() {
        info!(error = %e, "No .env file loaded");
    }

    let args = Cli::parse();
    let settings = Settings::load(args.config.as_deref())?;

    // --- Repair mode: fix image references and exit ---
    if args.repair {
        let outcome = repair_store(args.output.as_ref(), args.images_dir.as_ref()).await?;
        info!(
            examined = outcome.examined,
            repaired = outcome.repaired,
            "Repair pass complete"
        );
        return Ok(());
    }

    // Early check: both stores and the image root must be writable, or the
    // run cannot guarantee durability.
    ensure_writable_dir(&args.images_dir).await.map_err(|e| {
        error!(path = %args.images_dir, error = %e, "Images directory is not writable");
        e
    })?;

    // ---- Ingest: merge collector output into the news store ----
    let raw_items = load_raw_items(&args.input).await;
    let mut news = NewsStore::load(&args.store).await;
    let merge = news.merge(raw_items);
    info!(
        merged = merge.merged,
        inserted = merge.inserted,
        duplicates = merge.duplicates,
        total = news.len(),
        "Ingest complete"
    );
    news.save(&args.store).await.map_err(|e| {
        error!(path = %args.store, error = %e, "Failed to save news store");
        e
    })?;

    // ---- Enrich: wire up the services that have credentials ----
    if args.gemini_key.is_none() {
        warn!("No Gemini key configured; items will keep their original text");
    }
    if args.unsplash_key.is_none() {
        warn!("No Unsplash key configured; stock-photo fallback disabled");
    }

    let retry = settings.retry_policy();
    let text = args
        .gemini_key
        .clone()
        .map(|key| GeminiText::new(key, settings.text_model.clone()));
    let generator = args
        .gemini_key
        .clone()
        .map(|key| GeminiImage::new(key, settings.image_model.clone()));
    let search = args.unsplash_key.clone().map(UnsplashSearch::new);

    let chain = ImageChain::new(generator, search, args.images_dir.clone(), retry.clone());
    let enhancer = Enhancer::new(
        text,
        chain,
        EnhancerConfig {
            checkpoint_every: settings.checkpoint_every.max(1),
            force: args.force,
            retry,
        },
    );

    let summary = enhancer.run(&news, args.output.as_ref()).await.map_err(|e| {
        error!(path = %args.output, error = %e, "Enrichment run failed");
        e
    })?;

    let elapsed = start_time.elapsed();
    info!(
        examined = summary.examined,
        enriched = summary.enriched,
        degraded = summary.degraded,
        skipped = summary.skipped,
        checkpoints = summary.checkpoints,
        secs = elapsed.as_secs(),
        "Execution complete"
    );

    Ok(())
}
