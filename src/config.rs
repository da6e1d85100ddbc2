//! Optional YAML settings file for service and pipeline tuning.
//!
//! Everything here has a sensible default; a settings file only needs the
//! keys it wants to override:
//!
//! ```yaml
//! text_model: gemini-2.0-flash
//! image_model: imagen-3.0-generate-002
//! checkpoint_every: 5
//! retry:
//!   max_attempts: 5
//!   base_delay_secs: 30
//!   max_delay_secs: 300
//! ```

use crate::api::RetryPolicy;
use serde::Deserialize;
use std::error::Error;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gemini model used for rewrite and tag generation.
    pub text_model: String,
    /// Gemini model used for image generation.
    pub image_model: String,
    /// Items between checkpoint saves of the enrichment output.
    pub checkpoint_every: usize,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            text_model: "gemini-2.0-flash".to_string(),
            image_model: "imagen-3.0-generate-002".to_string(),
            checkpoint_every: 5,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 5,
            base_delay_secs: 30,
            max_delay_secs: 300,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file, or the defaults when no path is given.
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn Error>> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let settings: Settings = serde_yaml::from_str(&text)?;
                info!(path, "Loaded settings file");
                Ok(settings)
            }
            None => Ok(Settings::default()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_secs(self.retry.base_delay_secs),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }
}
