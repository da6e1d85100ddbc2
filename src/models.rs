//! Data models for news items across the pipeline.
//!
//! This module defines the two record shapes the pipeline moves between:
//! - [`RawNewsItem`]: a normalized item as handed over by a collector
//!   (RSS, aggregator search, news API) before it has an identity in the store
//! - [`NewsItem`]: a persisted record keyed by `news_id`, optionally carrying
//!   the enrichment fields added by the enhancer and the image chain
//!
//! The JSON field names are snake_case and match the on-disk stores
//! (`all_news.json`, `enhanced_news.json`). Unknown fields in those files are
//! tolerated on read; `None` fields are omitted on write so that audit tooling
//! sees exactly the fields a record actually has.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A normalized news item produced by a collector.
///
/// Collectors are external to this crate; they hand over a flat list of these.
/// A raw item has no storage identity yet — [`crate::store::NewsStore::merge`]
/// either matches it to an existing record via its identity key or assigns it
/// a fresh `news_id`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNewsItem {
    /// Publisher or feed name.
    #[serde(default)]
    pub source: String,
    /// Original headline.
    #[serde(default)]
    pub heading: String,
    /// Original summary or description text.
    #[serde(default)]
    pub summary: String,
    /// Canonical article URL; the preferred deduplication anchor.
    #[serde(default)]
    pub link: String,
    /// Category as reported by the feed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Extracted article body, if a text-extraction collaborator supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

/// A persisted news record.
///
/// `news_id` is assigned exactly once, at first ingestion, and never
/// reassigned; every other identifier in the system (image filenames, the
/// processed-id set) hangs off it. The enrichment fields are absent until the
/// enhancer has run for this record; a record with a `seo_headline` counts as
/// processed and is skipped on later runs unless reprocessing is forced.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewsItem {
    /// Unique storage identifier (UUID v4), stable for the record's lifetime.
    /// Defaults to empty on read so one malformed record does not fail the
    /// whole store; the loader skips empty-id records.
    #[serde(default)]
    pub news_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,

    // Enrichment fields, added by the enhancer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_full_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    /// Identifier the image chain used as a filename hint; same UUID as
    /// `news_id` so store records and image files stay linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// Final resolved image as a bare filename under the images root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Raw path as produced by the image chain step, before normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl NewsItem {
    /// Build a fresh record from a raw item, assigning a new `news_id`.
    pub fn from_raw(raw: RawNewsItem) -> Self {
        NewsItem {
            news_id: Uuid::new_v4().to_string(),
            source: raw.source,
            heading: raw.heading,
            summary: raw.summary,
            link: raw.link,
            category: raw.category,
            full_text: raw.full_text,
            ..NewsItem::default()
        }
    }

    /// Whether this record already carries enrichment output.
    pub fn is_enriched(&self) -> bool {
        self.seo_headline.is_some()
    }

    pub fn identity_key(&self) -> Option<String> {
        identity_key(&self.link, &self.heading)
    }
}

impl RawNewsItem {
    pub fn identity_key(&self) -> Option<String> {
        identity_key(&self.link, &self.heading)
    }
}

/// Derive the deduplication key for an item: the link if non-empty, else the
/// heading. Two items with the same key describe the same logical article no
/// matter what identifier their collectors assigned.
///
/// An item with neither a link nor a heading has no stable identity and is
/// treated as always-new: `None` never matches anything.
pub fn identity_key(link: &str, heading: &str) -> Option<String> {
    if !link.trim().is_empty() {
        Some(link.trim().to_string())
    } else if !heading.trim().is_empty() {
        Some(heading.trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_prefers_link() {
        assert_eq!(
            identity_key("https://x/1", "A headline"),
            Some("https://x/1".to_string())
        );
    }

    #[test]
    fn identity_key_falls_back_to_heading() {
        assert_eq!(identity_key("", "A headline"), Some("A headline".to_string()));
        assert_eq!(identity_key("   ", "A headline"), Some("A headline".to_string()));
    }

    #[test]
    fn identity_key_absent_when_both_empty() {
        assert_eq!(identity_key("", ""), None);
    }

    #[test]
    fn from_raw_assigns_fresh_id() {
        let raw = RawNewsItem {
            source: "BBC".to_string(),
            heading: "Test".to_string(),
            ..RawNewsItem::default()
        };
        let a = NewsItem::from_raw(raw.clone());
        let b = NewsItem::from_raw(raw);
        assert!(!a.news_id.is_empty());
        assert_ne!(a.news_id, b.news_id);
        assert!(!a.is_enriched());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let json = r#"{
            "news_id": "abc",
            "heading": "Test",
            "pubDate": "yesterday",
            "extra": {"nested": true}
        }"#;
        let item: NewsItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.news_id, "abc");
        assert_eq!(item.heading, "Test");
    }

    #[test]
    fn none_fields_are_omitted_on_write() {
        let item = NewsItem {
            news_id: "abc".to_string(),
            heading: "Test".to_string(),
            ..NewsItem::default()
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("seo_headline"));
        assert!(!json.contains("image_path"));
    }

    #[test]
    fn enriched_marker_follows_seo_headline() {
        let mut item = NewsItem {
            news_id: "abc".to_string(),
            ..NewsItem::default()
        };
        assert!(!item.is_enriched());
        item.seo_headline = Some("Rewritten".to_string());
        assert!(item.is_enriched());
    }
}
