//! Utility functions for string sanitization and file system checks.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

static UNSAFE_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes with an ellipsis and byte count
/// indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= max)
            .last()
            .unwrap_or(0);
        format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
    }
}

/// Sanitize a filename hint for use in image filenames.
///
/// Takes at most the first 50 characters, replaces spaces with underscores,
/// and strips everything outside `[A-Za-z0-9_-]`.
pub fn safe_filename_hint(hint: &str) -> String {
    let prefix: String = hint.chars().take(50).collect();
    let underscored = prefix.replace(' ', "_");
    UNSAFE_FILENAME_CHARS.replace_all(&underscored, "").to_string()
}

/// Bucket directory name for a category: lower-cased, spaces to underscores.
/// Empty or missing categories bucket under `general`.
pub fn category_bucket(category: Option<&str>) -> String {
    match category {
        Some(c) if !c.trim().is_empty() => c.trim().to_lowercase().replace(' ', "_"),
        _ => "general".to_string(),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then probes it with a throwaway file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("bytes)"));
    }

    #[test]
    fn safe_hint_strips_and_shortens() {
        assert_eq!(safe_filename_hint("a news id"), "a_news_id");
        assert_eq!(safe_filename_hint("slash/dot. and:colon"), "slashdot_andcolon");
        assert_eq!(safe_filename_hint(&"x".repeat(80)).len(), 50);
        assert_eq!(
            safe_filename_hint("0b2e45dd-9fd1-4c3a-8f12-3c0de8a1b2c3"),
            "0b2e45dd-9fd1-4c3a-8f12-3c0de8a1b2c3"
        );
    }

    #[test]
    fn category_bucket_normalizes() {
        assert_eq!(category_bucket(Some("World News")), "world_news");
        assert_eq!(category_bucket(Some(" Business ")), "business");
        assert_eq!(category_bucket(Some("")), "general");
        assert_eq!(category_bucket(None), "general");
    }

    #[tokio::test]
    async fn writable_dir_probe_passes_on_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        ensure_writable_dir(path.to_str().unwrap()).await.unwrap();
        assert!(path.is_dir());
    }
}
