//! Command-line interface definitions for briefwire.
//!
//! All options can be provided as flags; the API keys can also come from the
//! environment (or a `.env` file, loaded at startup).

use clap::Parser;

/// Command-line arguments for the briefwire pipeline.
///
/// # Examples
///
/// ```sh
/// # Ingest collector output and enrich everything new
/// briefwire --input news.json --store all_news.json --output enhanced_news.json
///
/// # Re-enrich everything, e.g. after a prompt change
/// briefwire --force
///
/// # Fix records pointing at missing or empty image files
/// briefwire --repair
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Collector output to ingest: a JSON array of raw news items
    #[arg(short, long, default_value = "news.json")]
    pub input: String,

    /// Deduplicated news store, merged across runs
    #[arg(short, long, default_value = "all_news.json")]
    pub store: String,

    /// Enrichment output store
    #[arg(short, long, default_value = "enhanced_news.json")]
    pub output: String,

    /// Root directory for generated and downloaded images
    #[arg(long, default_value = "images")]
    pub images_dir: String,

    /// Optional path to a YAML settings file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Gemini API key; enables rewrite, tags, and image generation
    #[arg(long, env = "GEMINI_KEY")]
    pub gemini_key: Option<String>,

    /// Unsplash access key; enables the stock-photo fallback
    #[arg(long, env = "UNSPLASH_KEY")]
    pub unsplash_key: Option<String>,

    /// Re-enrich items that were already processed in earlier runs
    #[arg(long)]
    pub force: bool,

    /// Repair image references in the output store and exit
    #[arg(long)]
    pub repair: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["briefwire"]);
        assert_eq!(cli.input, "news.json");
        assert_eq!(cli.store, "all_news.json");
        assert_eq!(cli.output, "enhanced_news.json");
        assert_eq!(cli.images_dir, "images");
        assert!(!cli.force);
        assert!(!cli.repair);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "briefwire",
            "-i",
            "/tmp/in.json",
            "-s",
            "/tmp/store.json",
            "-o",
            "/tmp/out.json",
            "--images-dir",
            "/tmp/images",
            "--force",
        ]);
        assert_eq!(cli.input, "/tmp/in.json");
        assert_eq!(cli.store, "/tmp/store.json");
        assert_eq!(cli.output, "/tmp/out.json");
        assert_eq!(cli.images_dir, "/tmp/images");
        assert!(cli.force);
    }
}
