//! Image resolution with a guaranteed fallback chain.
//!
//! Every enriched item ends with an `image` naming a real, non-empty file
//! under the images root. The chain tries, in order:
//!
//! 1. Gemini image generation (through the retry-backoff caller)
//! 2. Unsplash stock-photo search with the same prompt
//! 3. A local scan for any file already named after the item's identifier
//!    (covers images fetched by an earlier, interrupted run)
//! 4. The `default.png` placeholder, written from an embedded PNG if it does
//!    not exist yet — this step cannot fail
//!
//! Generated and downloaded images land in a category-bucketed subdirectory
//! (`{root}/{bucket}/{hint}_gemini.png` / `_unsplash.jpg`); the placeholder
//! lives at the root. The resolved `image` field is always a bare filename.
//!
//! The module also hosts the standalone repair pass that rewrites records
//! whose image file has gone missing or zero-byte.

use crate::api::{RetryPolicy, ServiceError, call_with_retry, classify_gemini_response};
use crate::models::NewsItem;
use crate::utils::{category_bucket, safe_filename_hint, truncate_for_log};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const UNSPLASH_RANDOM_URL: &str = "https://api.unsplash.com/photos/random";

/// Filename of the guaranteed placeholder at the images root.
pub const DEFAULT_IMAGE: &str = "default.png";

/// Minimal valid 1x1 transparent PNG, written as `default.png` when the
/// placeholder is missing so the chain's terminal step always has a file.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Prompt-to-bytes image generation service.
pub trait ImageGenerate {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ServiceError>;
}

/// Prompt-to-URL stock photo search service.
pub trait ImageSearch {
    async fn search(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Which chain step produced the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Generated,
    Stock,
    Local,
    Default,
}

/// Outcome of a chain run: a filename that exists on disk, plus the raw path
/// the producing step reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Bare filename, no directory component.
    pub image: String,
    /// Path as produced by the resolving step, relative to the working dir.
    pub image_path: String,
    pub origin: ImageOrigin,
}

/// Gemini image-generation client (`imagen` family over REST).
#[derive(Debug, Clone)]
pub struct GeminiImage {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiImage {
    pub fn new(api_key: String, model: String) -> Self {
        GeminiImage {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

impl ImageGenerate for GeminiImage {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ServiceError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let value = classify_gemini_response(resp).await?;

        let encoded = value
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .and_then(|parts| {
                parts
                    .iter()
                    .find_map(|p| p.pointer("/inlineData/data").and_then(Value::as_str))
            })
            .ok_or_else(|| {
                ServiceError::BadResponse(format!(
                    "no inline image data in reply: {}",
                    truncate_for_log(&value.to_string(), 300)
                ))
            })?;

        BASE64
            .decode(encoded)
            .map_err(|e| ServiceError::BadResponse(format!("invalid image encoding: {e}")))
    }
}

/// Unsplash random-photo search client.
#[derive(Debug, Clone)]
pub struct UnsplashSearch {
    client: reqwest::Client,
    access_key: String,
}

impl UnsplashSearch {
    pub fn new(access_key: String) -> Self {
        UnsplashSearch {
            client: reqwest::Client::new(),
            access_key,
        }
    }
}

impl ImageSearch for UnsplashSearch {
    #[instrument(level = "info", skip_all)]
    async fn search(&self, prompt: &str) -> Result<String, ServiceError> {
        let url = format!(
            "{}?query={}&client_id={}",
            UNSPLASH_RANDOM_URL,
            urlencoding::encode(prompt),
            self.access_key
        );
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited(truncate_for_log(&body, 200)));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ServiceError::Auth(truncate_for_log(&body, 200)));
        }
        if !status.is_success() {
            return Err(ServiceError::BadResponse(format!(
                "status {}: {}",
                status,
                truncate_for_log(&body, 200)
            )));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ServiceError::BadResponse(format!("invalid JSON body: {e}")))?;
        value
            .pointer("/urls/regular")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::BadResponse("no image URL in reply".to_string()))
    }
}

/// The ordered fallback chain. Either remote service is optional; a missing
/// credential simply skips its step.
#[derive(Debug)]
pub struct ImageChain<G, S> {
    generator: Option<G>,
    search: Option<S>,
    http: reqwest::Client,
    images_root: PathBuf,
    retry: RetryPolicy,
}

impl<G, S> ImageChain<G, S>
where
    G: ImageGenerate,
    S: ImageSearch,
{
    pub fn new(
        generator: Option<G>,
        search: Option<S>,
        images_root: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        ImageChain {
            generator,
            search,
            http: reqwest::Client::new(),
            images_root: images_root.into(),
            retry,
        }
    }

    /// Run the chain. Infallible by construction: the terminal placeholder
    /// step always produces an existing, non-empty file.
    #[instrument(level = "info", skip_all, fields(hint = %hint))]
    pub async fn resolve(
        &self,
        prompt: &str,
        hint: &str,
        category: Option<&str>,
    ) -> ResolvedImage {
        let safe = safe_filename_hint(hint);
        let bucket = self.images_root.join(category_bucket(category));

        if let Some(generator) = &self.generator {
            match call_with_retry(&self.retry, "image_generate", || generator.generate(prompt))
                .await
            {
                Ok(bytes) => {
                    let filename = format!("{safe}_gemini.png");
                    match self.persist(&bucket, &filename, &bytes).await {
                        Ok(path) => {
                            info!(path = %path, "Image generated");
                            return ResolvedImage {
                                image: filename,
                                image_path: path,
                                origin: ImageOrigin::Generated,
                            };
                        }
                        Err(e) => warn!(error = %e, "Could not persist generated image"),
                    }
                }
                Err(e) => warn!(error = %e, "Image generation failed; falling back"),
            }
        }

        if let Some(search) = &self.search {
            match self.fetch_stock(search, prompt, &bucket, &safe).await {
                Ok(resolved) => return resolved,
                Err(e) => warn!(error = %e, "Stock photo fallback failed"),
            }
        }

        if let Some(path) = find_local_image(&self.images_root, hint) {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
            info!(path = %path.display(), "Reusing local image");
            return ResolvedImage {
                image: filename,
                image_path: path.to_string_lossy().into_owned(),
                origin: ImageOrigin::Local,
            };
        }

        let path = ensure_placeholder(&self.images_root).await;
        ResolvedImage {
            image: DEFAULT_IMAGE.to_string(),
            image_path: path.to_string_lossy().into_owned(),
            origin: ImageOrigin::Default,
        }
    }

    async fn fetch_stock(
        &self,
        search: &S,
        prompt: &str,
        bucket: &Path,
        safe: &str,
    ) -> Result<ResolvedImage, ServiceError> {
        let url = search.search(prompt).await?;
        let url = url::Url::parse(&url)
            .map_err(|e| ServiceError::BadResponse(format!("unusable image URL: {e}")))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ServiceError::BadResponse(format!(
                "unusable image URL scheme: {}",
                url.scheme()
            )));
        }
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ServiceError::BadResponse(format!(
                "image download returned {}",
                resp.status()
            )));
        }
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(ServiceError::BadResponse("empty image download".to_string()));
        }

        let filename = format!("{safe}_unsplash.jpg");
        let path = self
            .persist(bucket, &filename, &bytes)
            .await
            .map_err(|e| ServiceError::BadResponse(format!("could not persist image: {e}")))?;
        info!(path = %path, "Stock image downloaded");
        Ok(ResolvedImage {
            image: filename,
            image_path: path,
            origin: ImageOrigin::Stock,
        })
    }

    async fn persist(
        &self,
        bucket: &Path,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, std::io::Error> {
        fs::create_dir_all(bucket).await?;
        let path = bucket.join(filename);
        fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Scan the images root and its first-level bucket directories for a
/// non-empty file whose name starts with `id`.
pub fn find_local_image(images_root: &Path, id: &str) -> Option<PathBuf> {
    if id.is_empty() {
        return None;
    }

    fn scan(dir: &Path, id: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            let starts = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(id));
            if path.is_file() && starts && file_has_bytes(&path) {
                return Some(path);
            }
        }
        None
    }

    if let Some(found) = scan(images_root, id) {
        return Some(found);
    }
    for entry in std::fs::read_dir(images_root).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = scan(&path, id) {
                return Some(found);
            }
        }
    }
    None
}

/// Make sure `default.png` exists at the images root, writing the embedded
/// placeholder if it is missing or empty. Returns its path.
pub async fn ensure_placeholder(images_root: &Path) -> PathBuf {
    let path = images_root.join(DEFAULT_IMAGE);
    if !file_has_bytes(&path) {
        if let Err(e) = fs::create_dir_all(images_root).await {
            warn!(error = %e, "Could not create images root");
        }
        match fs::write(&path, PLACEHOLDER_PNG).await {
            Ok(()) => info!(path = %path.display(), "Wrote placeholder image"),
            Err(e) => warn!(error = %e, path = %path.display(), "Could not write placeholder"),
        }
    }
    path
}

fn file_has_bytes(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Locate the existing file for a record's image reference, looking at the
/// root and every first-level bucket directory.
fn locate_by_basename(images_root: &Path, basename: &str) -> Option<PathBuf> {
    let direct = images_root.join(basename);
    if file_has_bytes(&direct) {
        return Some(direct);
    }
    for entry in std::fs::read_dir(images_root).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let candidate = path.join(basename);
            if file_has_bytes(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// What the repair pass did to a store.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub examined: usize,
    pub repaired: usize,
}

/// Standalone repair pass: rewrite every record whose image reference is
/// missing, non-existent, or zero-byte, using chain steps 3–4 (local lookup,
/// then placeholder). A backup of the pre-repair store is written next to it
/// before anything is mutated.
#[instrument(level = "info", skip_all, fields(store = %store_path.display()))]
pub async fn repair_store(
    store_path: &Path,
    images_root: &Path,
) -> Result<RepairOutcome, Box<dyn Error>> {
    let text = match fs::read_to_string(store_path).await {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "Store not readable; nothing to repair");
            return Ok(RepairOutcome::default());
        }
    };
    let mut records: Vec<NewsItem> = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Store is not valid JSON; nothing to repair");
            return Ok(RepairOutcome::default());
        }
    };

    let backup_path = backup_path_for(store_path);
    fs::copy(store_path, &backup_path).await?;
    info!(backup = %backup_path.display(), "Backed up store before repair");

    let mut outcome = RepairOutcome {
        examined: records.len(),
        ..RepairOutcome::default()
    };

    for item in &mut records {
        let basename = item
            .image
            .as_deref()
            .or(item.image_path.as_deref())
            .map(image_basename)
            .filter(|b| !b.is_empty());

        match basename.as_deref().and_then(|b| locate_by_basename(images_root, b)) {
            Some(path) => {
                // File is fine; normalize any directory component away.
                let bare = image_basename(&path.to_string_lossy());
                if item.image.as_deref() != Some(bare.as_str()) {
                    item.image = Some(bare);
                    outcome.repaired += 1;
                }
            }
            None => {
                let (image, image_path) = match find_local_image(images_root, &item.news_id) {
                    Some(found) => (
                        image_basename(&found.to_string_lossy()),
                        found.to_string_lossy().into_owned(),
                    ),
                    None => {
                        let placeholder = ensure_placeholder(images_root).await;
                        (
                            DEFAULT_IMAGE.to_string(),
                            placeholder.to_string_lossy().into_owned(),
                        )
                    }
                };
                info!(news_id = %item.news_id, image = %image, "Repaired image reference");
                item.image = Some(image);
                item.image_path = Some(image_path);
                outcome.repaired += 1;
            }
        }
    }

    if outcome.repaired > 0 {
        let json = serde_json::to_string_pretty(&records)?;
        let tmp = store_path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, store_path).await?;
        info!(repaired = outcome.repaired, "Repaired store saved");
    } else {
        info!("No missing images found");
    }
    Ok(outcome)
}

/// Extract the bare filename from an image reference, tolerating either
/// separator style.
pub fn image_basename(reference: &str) -> String {
    reference
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn backup_path_for(store_path: &Path) -> PathBuf {
    let stem = store_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    store_path.with_file_name(format!("{stem}_backup.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingGen;
    impl ImageGenerate for FailingGen {
        async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, ServiceError> {
            Err(ServiceError::Auth("no access".to_string()))
        }
    }

    struct BytesGen(Vec<u8>);
    impl ImageGenerate for BytesGen {
        async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, ServiceError> {
            Ok(self.0.clone())
        }
    }

    struct NoSearch;
    impl ImageSearch for NoSearch {
        async fn search(&self, _prompt: &str) -> Result<String, ServiceError> {
            Err(ServiceError::BadResponse("unavailable".to_string()))
        }
    }

    fn test_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn generated_image_lands_in_category_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let chain: ImageChain<BytesGen, NoSearch> = ImageChain::new(
            Some(BytesGen(vec![1, 2, 3])),
            None,
            dir.path(),
            test_retry(),
        );

        let resolved = chain.resolve("a harbor at dawn", "id-123", Some("World News")).await;
        assert_eq!(resolved.origin, ImageOrigin::Generated);
        assert_eq!(resolved.image, "id-123_gemini.png");
        let on_disk = dir.path().join("world_news").join("id-123_gemini.png");
        assert!(on_disk.is_file());
        assert_eq!(std::fs::read(on_disk).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_sources_failing_resolves_to_existing_default() {
        let dir = tempfile::tempdir().unwrap();
        let chain: ImageChain<FailingGen, NoSearch> =
            ImageChain::new(Some(FailingGen), Some(NoSearch), dir.path(), test_retry());

        let resolved = chain.resolve("anything", "no-such-id", None).await;
        assert_eq!(resolved.origin, ImageOrigin::Default);
        assert_eq!(resolved.image, DEFAULT_IMAGE);
        let file = dir.path().join(DEFAULT_IMAGE);
        assert!(file.is_file());
        assert!(std::fs::metadata(&file).unwrap().len() > 0);
    }

    #[tokio::test]
    async fn local_lookup_finds_prior_run_image() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("general");
        std::fs::create_dir_all(&bucket).unwrap();
        std::fs::write(bucket.join("id-9_unsplash.jpg"), b"jpg").unwrap();

        let chain: ImageChain<FailingGen, NoSearch> =
            ImageChain::new(Some(FailingGen), None, dir.path(), test_retry());
        let resolved = chain.resolve("anything", "id-9", None).await;
        assert_eq!(resolved.origin, ImageOrigin::Local);
        assert_eq!(resolved.image, "id-9_unsplash.jpg");
    }

    #[tokio::test]
    async fn local_lookup_ignores_zero_byte_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("id-7_gemini.png"), b"").unwrap();

        let chain: ImageChain<FailingGen, NoSearch> =
            ImageChain::new(None, None, dir.path(), test_retry());
        let resolved = chain.resolve("anything", "id-7", None).await;
        assert_eq!(resolved.origin, ImageOrigin::Default);
    }

    #[test]
    fn basename_handles_both_separators() {
        assert_eq!(image_basename("images/general/a.png"), "a.png");
        assert_eq!(image_basename(r"images\general\a.png"), "a.png");
        assert_eq!(image_basename("a.png"), "a.png");
    }

    #[tokio::test]
    async fn repair_backs_up_then_fixes_missing_images() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("id-1_gemini.png"), b"png").unwrap();

        let store = dir.path().join("enhanced_news.json");
        let records = vec![
            NewsItem {
                news_id: "id-1".to_string(),
                image: Some("gone.png".to_string()),
                ..NewsItem::default()
            },
            NewsItem {
                news_id: "id-2".to_string(),
                ..NewsItem::default()
            },
            NewsItem {
                news_id: "id-3".to_string(),
                image: Some("images/id-3_kept.jpg".to_string()),
                ..NewsItem::default()
            },
        ];
        std::fs::write(images.join("id-3_kept.jpg"), b"jpg").unwrap();
        std::fs::write(&store, serde_json::to_string_pretty(&records).unwrap()).unwrap();

        let outcome = repair_store(&store, &images).await.unwrap();
        assert_eq!(outcome.examined, 3);
        assert_eq!(outcome.repaired, 3);
        assert!(dir.path().join("enhanced_news_backup.json").is_file());

        let repaired: Vec<NewsItem> =
            serde_json::from_str(&std::fs::read_to_string(&store).unwrap()).unwrap();
        // id-1: local lookup found its generated file.
        assert_eq!(repaired[0].image.as_deref(), Some("id-1_gemini.png"));
        // id-2: nothing anywhere, placeholder assigned and created.
        assert_eq!(repaired[1].image.as_deref(), Some(DEFAULT_IMAGE));
        assert!(images.join(DEFAULT_IMAGE).is_file());
        // id-3: file exists, reference normalized to the bare filename.
        assert_eq!(repaired[2].image.as_deref(), Some("id-3_kept.jpg"));
    }

    #[tokio::test]
    async fn repair_missing_store_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = repair_store(&dir.path().join("nope.json"), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome, RepairOutcome::default());
    }
}
