//! Enrichment orchestrator.
//!
//! Drives the per-item enrichment sequence — rewrite, tags, image — against
//! the enrichment output store, one item at a time. Each item moves through
//! `Unprocessed → Enriching → Enriched | Failed`; a failed item degrades to
//! its original heading/summary and an empty generated tag list instead of
//! aborting the batch.
//!
//! # Resumability
//!
//! The set of already-processed ids is derived by scanning the output store
//! at startup; those items are skipped unless reprocessing is forced. Output
//! is checkpointed every few items, so an interruption loses at most one
//! batch of work, and the next run merges into — never replaces — what prior
//! runs produced.

use crate::api::{RetryPolicy, TextGenerate, call_with_retry, parse_rewrite_response};
use crate::classify::{clean_text, infer_category, infer_tags, sanitize_tags, split_tags};
use crate::images::{ImageChain, ImageGenerate, ImageSearch};
use crate::models::NewsItem;
use crate::store::NewsStore;
use std::collections::HashSet;
use std::error::Error;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct EnhancerConfig {
    /// Save the output store after this many enriched items.
    pub checkpoint_every: usize,
    /// Re-enrich items already present in the output store.
    pub force: bool,
    /// Backoff policy for the rewrite and tag calls.
    pub retry: RetryPolicy,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        EnhancerConfig {
            checkpoint_every: 5,
            force: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// What one run of the orchestrator did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub examined: usize,
    pub enriched: usize,
    /// Items whose rewrite or tag call failed terminally and kept their
    /// original text.
    pub degraded: usize,
    pub skipped: usize,
    pub checkpoints: usize,
}

/// The enrichment orchestrator. The text service is optional: with no
/// credentials configured every item keeps its original text, but inference
/// and the image chain still run, so the store invariants hold either way.
pub struct Enhancer<T, G, S> {
    text: Option<T>,
    chain: ImageChain<G, S>,
    config: EnhancerConfig,
}

impl<T, G, S> Enhancer<T, G, S>
where
    T: TextGenerate,
    G: ImageGenerate,
    S: ImageSearch,
{
    pub fn new(text: Option<T>, chain: ImageChain<G, S>, config: EnhancerConfig) -> Self {
        Enhancer { text, chain, config }
    }

    /// Enrich every unprocessed item of `store`, merging results into the
    /// output store at `output_path`.
    ///
    /// Only output-store write failures are fatal; per-item service failures
    /// degrade that item and the run continues.
    #[instrument(level = "info", skip_all, fields(output = %output_path.display()))]
    pub async fn run(
        &self,
        store: &NewsStore,
        output_path: &Path,
    ) -> Result<RunSummary, Box<dyn Error>> {
        let mut output = NewsStore::load(output_path).await;
        let processed: HashSet<String> = output
            .items()
            .iter()
            .filter(|it| it.is_enriched())
            .map(|it| it.news_id.clone())
            .collect();
        info!(
            items = store.len(),
            already_processed = processed.len(),
            force = self.config.force,
            "Starting enrichment"
        );

        let mut summary = RunSummary {
            examined: store.len(),
            ..RunSummary::default()
        };
        let mut since_checkpoint = 0usize;

        for item in store.items() {
            if !self.config.force && processed.contains(&item.news_id) {
                debug!(news_id = %item.news_id, "Already enriched; skipping");
                summary.skipped += 1;
                continue;
            }

            debug!(news_id = %item.news_id, state = "enriching", "Processing item");
            let (enriched, degraded) = self.enrich_item(item).await;
            if degraded {
                summary.degraded += 1;
            } else {
                summary.enriched += 1;
            }
            output.upsert(enriched);
            since_checkpoint += 1;

            if since_checkpoint >= self.config.checkpoint_every {
                output.save(output_path).await?;
                summary.checkpoints += 1;
                since_checkpoint = 0;
                info!(
                    done = summary.enriched + summary.degraded,
                    total = store.len(),
                    "Checkpoint saved"
                );
            }
        }

        if since_checkpoint > 0 || summary.checkpoints == 0 {
            output.save(output_path).await?;
        }
        info!(
            enriched = summary.enriched,
            degraded = summary.degraded,
            skipped = summary.skipped,
            "Enrichment complete"
        );
        Ok(summary)
    }

    /// Run the enrichment sequence for one item. Returns the enriched record
    /// and whether it took the degraded path.
    async fn enrich_item(&self, item: &NewsItem) -> (NewsItem, bool) {
        let mut out = item.clone();
        let mut degraded = false;

        let (fields, generated_tags) = match &self.text {
            Some(service) => {
                let prompt = rewrite_prompt(item);
                let rewrite =
                    call_with_retry(&self.config.retry, "rewrite", || service.generate(&prompt))
                        .await;

                match rewrite {
                    Ok(reply) => {
                        let fields = parse_rewrite_response(&reply);
                        let tags = self.generate_tags(service, item, &fields.seo_headline).await;
                        (Some(fields), tags)
                    }
                    Err(e) => {
                        warn!(news_id = %item.news_id, error = %e, state = "failed", "Rewrite failed; keeping original text");
                        degraded = true;
                        (None, Vec::new())
                    }
                }
            }
            None => (None, Vec::new()),
        };

        match fields {
            Some(fields) => {
                let headline = clean_text(&fields.seo_headline);
                let summary = clean_text(&fields.rewritten_summary);
                out.seo_headline = Some(if headline.is_empty() {
                    item.heading.clone()
                } else {
                    headline
                });
                out.rewritten_summary = Some(if summary.is_empty() {
                    item.summary.clone()
                } else {
                    summary
                });
                if !fields.rewritten_full_text.is_empty() {
                    out.rewritten_full_text = Some(fields.rewritten_full_text);
                }
                out.image_prompt = Some(if fields.image_prompt.is_empty() {
                    fallback_image_prompt(out.seo_headline.as_deref().unwrap_or(&item.heading))
                } else {
                    fields.image_prompt
                });
            }
            None => {
                out.seo_headline = Some(item.heading.clone());
                out.rewritten_summary = Some(item.summary.clone());
                out.image_prompt = Some(fallback_image_prompt(&item.heading));
            }
        }

        self.fill_category_and_tags(&mut out, generated_tags);

        let prompt = out.image_prompt.clone().unwrap_or_default();
        let resolved = self
            .chain
            .resolve(&prompt, &item.news_id, out.category.as_deref())
            .await;
        out.image_id = Some(item.news_id.clone());
        out.image = Some(resolved.image);
        out.image_path = Some(resolved.image_path);

        let state = if degraded { "failed" } else { "enriched" };
        info!(news_id = %item.news_id, state, image = ?out.image, "Item processed");
        (out, degraded)
    }

    async fn generate_tags(&self, service: &T, item: &NewsItem, headline: &str) -> Vec<String> {
        let headline = if headline.is_empty() { &item.heading } else { headline };
        let prompt = tag_prompt(headline, &item.summary);
        let reply =
            call_with_retry(&self.config.retry, "tags", || service.generate(&prompt)).await;

        match reply {
            Ok(text) => split_tags(&text),
            Err(e) => {
                warn!(news_id = %item.news_id, error = %e, "Tag generation failed; leaving tags empty");
                Vec::new()
            }
        }
    }

    /// Apply the inference policy: an existing non-empty category is
    /// authoritative, as is an existing tag list that survives sanitization.
    /// Generated tags come next; the frequency heuristic is last.
    fn fill_category_and_tags(&self, out: &mut NewsItem, generated_tags: Vec<String>) {
        let headline = out
            .seo_headline
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| out.heading.clone());

        if out.category.as_deref().is_none_or(|c| c.trim().is_empty()) {
            let (category, subcategory) = infer_category(&headline, &out.summary);
            out.category = Some(category);
            out.subcategory = subcategory;
        }

        let existing = out.tags.take().map(sanitize_tags).filter(|t| !t.is_empty());
        let generated = Some(sanitize_tags(generated_tags)).filter(|t| !t.is_empty());
        out.tags = existing
            .or(generated)
            .or_else(|| Some(sanitize_tags(infer_tags(&headline, &out.summary))));
    }
}

fn rewrite_prompt(item: &NewsItem) -> String {
    let mut prompt = format!(
        "Rewrite the following news headline and summary in the style of a senior BBC news \
         editor or journalist: professional, objective, concise, and authoritative. Do NOT use \
         emojis, smileys, or informal language. Headlines should be compelling but serious.\n\
         Original headline: {}\n\
         Original summary: {}\n",
        item.heading, item.summary
    );
    if let Some(full_text) = item.full_text.as_deref().filter(|t| !t.is_empty()) {
        prompt.push_str(&format!("Original article: {full_text}\n"));
    }
    prompt.push_str(
        "Return your answer as:\n\
         Headline: <headline>\n\
         Summary: <summary>\n\
         Full Article: <full article>\n\
         Also, generate a prompt for an illustration image that matches the news.",
    );
    prompt
}

fn tag_prompt(headline: &str, summary: &str) -> String {
    format!(
        "Generate 5 relevant tags for this news article, separated by commas.\n\
         Headline: {headline}\n\
         Summary: {summary}"
    )
}

fn fallback_image_prompt(headline: &str) -> String {
    format!("An illustration for: {headline}")
}
