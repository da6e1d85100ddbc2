//! Persistent merge store for news records.
//!
//! The store is a JSON array of [`NewsItem`] records on disk, held in memory
//! as an order-preserving collection with an id index. Correctness does not
//! depend on ordering, but preserving insertion order keeps repeated saves
//! byte-stable and the output diffable.
//!
//! # Failure policy
//!
//! Reads fail soft: a missing or corrupt store file yields an empty store and
//! a warning, never a fatal error — the pipeline must not be blocked by a
//! transient read failure. Writes fail hard: if the store cannot be saved,
//! durability is gone and the run aborts with the error.
//!
//! # Merging
//!
//! [`NewsStore::merge`] resolves incoming raw items against existing records
//! by identity key (link, else heading) *before* assigning a fresh `news_id`,
//! so repeated ingestion of the same article across runs converges to one
//! record instead of duplicating it.

use crate::models::{NewsItem, RawNewsItem};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// In-memory view of a JSON news store, keyed by `news_id`.
#[derive(Debug, Default)]
pub struct NewsStore {
    items: Vec<NewsItem>,
    index: HashMap<String, usize>,
}

/// Counts of what a [`NewsStore::merge`] call did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Incoming items matched to an existing record and folded into it.
    pub merged: usize,
    /// Incoming items appended as new records.
    pub inserted: usize,
    /// Incoming items dropped as in-batch duplicates of an earlier item.
    pub duplicates: usize,
}

impl NewsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, news_id: &str) -> Option<&NewsItem> {
        self.index.get(news_id).map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[NewsItem] {
        &self.items
    }

    /// Insert or replace a record by `news_id`. Last write wins.
    pub fn upsert(&mut self, item: NewsItem) {
        match self.index.get(&item.news_id) {
            Some(&i) => self.items[i] = item,
            None => {
                self.index.insert(item.news_id.clone(), self.items.len());
                self.items.push(item);
            }
        }
    }

    /// Fold a batch of raw collector items into the store.
    ///
    /// The batch is first deduplicated internally by identity key (the first
    /// occurrence wins). Each surviving item is then matched against existing
    /// records: a match inherits the existing record's `news_id` and its
    /// enrichment fields, and overwrites the descriptive fields; a miss (or an
    /// item with no identity at all) becomes a new record with a fresh id.
    #[instrument(level = "info", skip_all, fields(incoming = raw_items.len(), existing = self.items.len()))]
    pub fn merge(&mut self, raw_items: Vec<RawNewsItem>) -> MergeOutcome {
        let mut by_identity: HashMap<String, String> = self
            .items
            .iter()
            .filter_map(|it| it.identity_key().map(|k| (k, it.news_id.clone())))
            .collect();

        let mut seen_in_batch: HashSet<String> = HashSet::new();
        let mut outcome = MergeOutcome::default();

        for raw in raw_items {
            let key = raw.identity_key();
            if let Some(ref k) = key {
                if !seen_in_batch.insert(k.clone()) {
                    outcome.duplicates += 1;
                    continue;
                }
            }

            match key.as_ref().and_then(|k| by_identity.get(k)).cloned() {
                Some(news_id) => {
                    let i = self.index[&news_id];
                    let existing = &mut self.items[i];
                    existing.source = raw.source;
                    existing.heading = raw.heading;
                    existing.summary = raw.summary;
                    existing.link = raw.link;
                    if raw.category.as_deref().is_some_and(|c| !c.is_empty()) {
                        existing.category = raw.category;
                    }
                    if raw.full_text.as_deref().is_some_and(|t| !t.is_empty()) {
                        existing.full_text = raw.full_text;
                    }
                    debug!(%news_id, "Merged incoming item into existing record");
                    outcome.merged += 1;
                }
                None => {
                    let item = NewsItem::from_raw(raw);
                    if let Some(k) = key {
                        by_identity.insert(k, item.news_id.clone());
                    }
                    debug!(news_id = %item.news_id, "Inserted new record");
                    self.upsert(item);
                    outcome.inserted += 1;
                }
            }
        }

        info!(
            merged = outcome.merged,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            total = self.items.len(),
            "Merge complete"
        );
        outcome
    }

    /// Load a store from disk.
    ///
    /// A missing file, unreadable file, or malformed JSON all yield an empty
    /// store with a warning. Array entries that parse but have an empty
    /// `news_id` are skipped.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let text = match fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Store not readable; starting empty");
                return Self::new();
            }
        };

        let records: Vec<NewsItem> = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Store is not valid JSON; starting empty");
                return Self::new();
            }
        };

        let mut store = Self::new();
        for item in records {
            if item.news_id.is_empty() {
                warn!(heading = %item.heading, "Skipping record without news_id");
                continue;
            }
            store.upsert(item);
        }
        info!(count = store.len(), "Loaded store");
        store
    }

    /// Save the full store as pretty-printed JSON.
    ///
    /// Writes to a sibling `.tmp` file and renames it over the target so a
    /// crash mid-write never leaves a truncated store behind.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display(), count = self.items.len()))]
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.items)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await?;
        info!(path = %path.display(), "Wrote store");
        Ok(())
    }
}

/// Read a collector output file: a JSON array of raw items.
///
/// Same soft-fail policy as the store: a missing or malformed input file is an
/// empty batch, not a fatal error.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_raw_items(path: impl AsRef<Path>) -> Vec<RawNewsItem> {
    let path = path.as_ref();
    match fs::read_to_string(path).await {
        Ok(text) => match serde_json::from_str::<Vec<RawNewsItem>>(&text) {
            Ok(items) => {
                info!(count = items.len(), "Loaded raw items");
                items
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Input is not a JSON item list; ignoring");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Input not readable; nothing to ingest");
            Vec::new()
        }
    }
}
