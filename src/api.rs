//! External service calls with exponential backoff on rate limits.
//!
//! This module owns the boundary to the text-generation service:
//! - [`ServiceError`]: the error taxonomy every external call maps into
//! - [`TextGenerate`]: trait for prompt-in/text-out generation, so the
//!   enhancer can be driven by a stub in tests
//! - [`call_with_retry`]: the retry-backoff caller wrapping any external call
//! - [`GeminiText`]: the production client for the Gemini REST API
//! - [`parse_rewrite_response`]: line-oriented parser for the rewrite reply
//!
//! # Retry strategy
//!
//! Only rate-limit/quota signals are retried. The delay starts at 30 seconds,
//! doubles per attempt, and is capped at 300 seconds; a random 0–250 ms jitter
//! is added to each sleep. After 5 attempts the call fails terminally with
//! [`ServiceError::QuotaExhausted`] — terminal for the item being processed,
//! never for the whole batch. Every other failure propagates immediately.

use rand::{Rng, rng};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::utils::truncate_for_log;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Failure taxonomy for external service calls.
///
/// The retry caller keys off these variants: [`ServiceError::RateLimited`] is
/// retried with backoff, everything else fails fast.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service signalled a rate limit or exhausted quota (HTTP 429 or a
    /// `RESOURCE_EXHAUSTED` error payload). Retried with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Retries were exhausted on a rate-limited call. Terminal for the item.
    #[error("quota exceeded after {attempts} attempts")]
    QuotaExhausted { attempts: u32 },
    /// The service rejected our credentials. Not retried.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The service answered, but not in a shape we can use. Not retried.
    #[error("malformed response: {0}")]
    BadResponse(String),
    /// Transport-level failure. Not retried.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ServiceError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_))
    }
}

/// Backoff tuning for [`call_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum total attempts before giving up with `QuotaExhausted`.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt after that.
    pub base_delay: Duration,
    /// Ceiling the doubled delay never exceeds.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Execute an external call, retrying rate-limited attempts with exponential
/// backoff, bounded by `policy`.
///
/// `op` is invoked up to `policy.max_attempts` times. A `RateLimited` error
/// sleeps `min(base_delay * 2^(attempt-1), max_delay)` plus 0–250 ms of jitter
/// and tries again; any other error returns immediately. When attempts run
/// out the result is [`ServiceError::QuotaExhausted`].
#[instrument(level = "info", skip(policy, op))]
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut delay = policy.base_delay.min(policy.max_delay);

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(v) => {
                if attempt > 1 {
                    info!(op_name, attempt, "Call succeeded after backoff");
                }
                return Ok(v);
            }
            Err(e) if e.is_rate_limit() => {
                if attempt == policy.max_attempts {
                    error!(op_name, attempt, max = policy.max_attempts, error = %e, "Retries exhausted");
                    break;
                }
                let jitter = Duration::from_millis(rng().random_range(0..=250));
                warn!(
                    op_name,
                    attempt,
                    max = policy.max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Rate limited; backing off"
                );
                sleep(delay + jitter).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(e) => {
                warn!(op_name, attempt, error = %e, "Call failed; not retryable");
                return Err(e);
            }
        }
    }

    Err(ServiceError::QuotaExhausted {
        attempts: policy.max_attempts,
    })
}

/// Prompt-in/text-out generation service.
pub trait TextGenerate {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Gemini text-generation client over the REST `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiText {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiText {
    pub fn new(api_key: String, model: String) -> Self {
        GeminiText {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

impl TextGenerate for GeminiText {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let value = classify_gemini_response(resp).await?;

        let text = value
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ServiceError::BadResponse(format!(
                "no candidate text in reply: {}",
                truncate_for_log(&value.to_string(), 300)
            )));
        }
        Ok(text)
    }
}

/// Map a raw Gemini HTTP response to the error taxonomy, or hand back the
/// parsed JSON body on success.
pub(crate) async fn classify_gemini_response(
    resp: reqwest::Response,
) -> Result<Value, ServiceError> {
    let status = resp.status();
    let body = resp.text().await?;

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || (!status.is_success() && looks_like_quota_error(&body))
    {
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

    serde_json::from_str(&body)
        .map_err(|e| ServiceError::BadResponse(format!("invalid JSON body: {e}")))
}

/// Quota errors arrive under various 4xx/5xx statuses; match on the payload
/// text the way the quota checker in the service's own client libraries does.
fn looks_like_quota_error(body: &str) -> bool {
    body.contains("RESOURCE_EXHAUSTED") || body.to_ascii_lowercase().contains("quota")
}

/// Structured fields recovered from a rewrite reply.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RewriteFields {
    pub seo_headline: String,
    pub rewritten_summary: String,
    pub rewritten_full_text: String,
    pub image_prompt: String,
}

/// Parse the rewrite reply into its labelled sections.
///
/// The reply is expected in the prompted form:
///
/// ```text
/// Headline: <headline>
/// Summary: <summary>
/// Full Article: <body>
/// Image prompt: <prompt>
/// ```
///
/// Summary and full-article sections may continue over following lines; a
/// line mentioning "image" or "illustration" starts the image prompt. Absent
/// sections come back empty — the caller decides the fallbacks.
pub fn parse_rewrite_response(text: &str) -> RewriteFields {
    #[derive(PartialEq)]
    enum Section {
        None,
        Summary,
        FullText,
    }

    let mut fields = RewriteFields::default();
    let mut current = Section::None;

    for line in text.lines() {
        let line = line.trim();
        let lower = line.to_lowercase();
        if lower.starts_with("headline:") {
            current = Section::None;
            fields.seo_headline = after_colon(line);
        } else if lower.starts_with("summary:") {
            current = Section::Summary;
            fields.rewritten_summary = after_colon(line);
        } else if lower.starts_with("full article:") {
            current = Section::FullText;
            fields.rewritten_full_text = after_colon(line);
        } else if lower.contains("illustration") || lower.contains("image") {
            current = Section::None;
            fields.image_prompt = after_colon(line);
        } else if current == Section::Summary && !line.is_empty() {
            fields.rewritten_summary.push('\n');
            fields.rewritten_summary.push_str(line);
        } else if current == Section::FullText && !line.is_empty() {
            fields.rewritten_full_text.push('\n');
            fields.rewritten_full_text.push_str(line);
        }
    }
    fields
}

fn after_colon(line: &str) -> String {
    line.split_once(':')
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    fn default_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_two_rate_limits_with_growing_delays() {
        let calls = Cell::new(0u32);
        let started = Instant::now();

        let res = call_with_retry(&default_policy(), "tags", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n <= 2 {
                    Err(ServiceError::RateLimited("429".to_string()))
                } else {
                    Ok("Politics, Economy".to_string())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(res, "Politics, Economy");
        assert_eq!(calls.get(), 3);
        // Slept 30 s then 60 s, plus at most 250 ms jitter per sleep.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(90), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(91), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_is_terminal_and_bounded() {
        let calls = Cell::new(0u32);
        let started = Instant::now();

        let res: Result<(), _> = call_with_retry(&default_policy(), "rewrite", || {
            calls.set(calls.get() + 1);
            async { Err(ServiceError::RateLimited("quota".to_string())) }
        })
        .await;

        assert!(matches!(res, Err(ServiceError::QuotaExhausted { attempts: 5 })));
        assert_eq!(calls.get(), 5);
        // Four sleeps: 30 + 60 + 120 + 240 seconds, never hitting the cap.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(450), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(452), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_never_exceeds_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 8,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        };
        let started = Instant::now();

        let res: Result<(), _> = call_with_retry(&policy, "rewrite", || async {
            Err(ServiceError::RateLimited("quota".to_string()))
        })
        .await;

        assert!(matches!(res, Err(ServiceError::QuotaExhausted { attempts: 8 })));
        // 30 + 60 + 120 + 240 + 300 + 300 + 300 = 1350 s: capped at 300 from
        // the fifth sleep on.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1350), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(1353), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn non_rate_limit_errors_fail_fast() {
        let calls = Cell::new(0u32);
        let res: Result<(), _> = call_with_retry(&default_policy(), "rewrite", || {
            calls.set(calls.get() + 1);
            async { Err(ServiceError::Auth("bad key".to_string())) }
        })
        .await;

        assert!(matches!(res, Err(ServiceError::Auth(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn parses_full_rewrite_reply() {
        let reply = "\
Headline: Markets Rally on Rate Decision
Summary: Stocks climbed sharply on Tuesday.
Investors welcomed the pause.
Full Article: The rally began at the open.
It held through the close.
Image prompt: A rising stock chart on a trading floor";

        let fields = parse_rewrite_response(reply);
        assert_eq!(fields.seo_headline, "Markets Rally on Rate Decision");
        assert_eq!(
            fields.rewritten_summary,
            "Stocks climbed sharply on Tuesday.\nInvestors welcomed the pause."
        );
        assert_eq!(
            fields.rewritten_full_text,
            "The rally began at the open.\nIt held through the close."
        );
        assert_eq!(fields.image_prompt, "A rising stock chart on a trading floor");
    }

    #[test]
    fn parse_tolerates_missing_sections() {
        let fields = parse_rewrite_response("Headline: Just a headline");
        assert_eq!(fields.seo_headline, "Just a headline");
        assert!(fields.rewritten_summary.is_empty());
        assert!(fields.image_prompt.is_empty());
    }

    #[test]
    fn parse_accepts_illustration_phrasing() {
        let fields =
            parse_rewrite_response("Headline: H\nAn illustration for this story: a harbor at dawn");
        assert_eq!(fields.image_prompt, "a harbor at dawn");
    }

    #[test]
    fn quota_detection_matches_payload_text() {
        assert!(looks_like_quota_error("error RESOURCE_EXHAUSTED"));
        assert!(looks_like_quota_error("Quota exceeded for model"));
        assert!(!looks_like_quota_error("internal error"));
    }
}
