//! Heuristic category and tag inference.
//!
//! Used only when a record has no authoritative category or tag list. The
//! classifier is a deterministic keyword table — explicitly not a model: the
//! first label in declaration order with any keyword appearing as a substring
//! of the case-folded headline+summary text wins. Labels of the form
//! `main:sub` yield a subcategory; no match falls back to `General`.
//!
//! Tag inference ranks headline+summary tokens longer than four characters by
//! frequency and keeps the top five. Sanitization drops tags that are empty,
//! over-length, non-alphabetic-initial, or that look like generation-model
//! meta-commentary leaking into the tag list.

use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered keyword table. Declaration order is load-bearing: matching is
/// first-label-wins, so the plain `sports` entry shadows `sports:football`
/// whenever one of its own keywords is also present.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("sports", &["football", "cricket", "tennis", "sports", "game", "match"]),
    ("business", &["business", "stock", "market", "finance", "company"]),
    ("technology", &["tech", "ai", "robot", "software", "hardware", "technology"]),
    ("science", &["science", "research", "study", "scientist"]),
    ("entertainment", &["movie", "film", "music", "celebrity", "entertainment"]),
    ("world", &["world", "international", "global", "war", "country"]),
    ("health", &["health", "covid", "virus", "doctor", "hospital"]),
    ("politics", &["election", "government", "politics", "minister", "policy"]),
    ("crime", &["crime", "attack", "police", "court", "arrest", "murder"]),
    ("environment", &["climate", "environment", "pollution", "wildlife", "nature"]),
    ("sports:football", &["football", "soccer", "premier league", "fifa"]),
    ("sports:cricket", &["cricket", "ipl", "test match", "odi"]),
    ("business:markets", &["stock market", "share", "index", "sensex", "nifty"]),
];

/// Fragments that betray meta-commentary from a generation model rather than
/// an actual tag ("Here are 5 tags for...").
const TAG_BOILERPLATE: &[&str] = &[
    "here are",
    "based on",
    "tags for",
    "summary:",
    "headline",
    "partial",
    "news article",
];

static MARKDOWN_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*").unwrap());
static DISALLOWED_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[^\w\s.,!?'"-]"#).unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Infer `(category, subcategory)` from headline and summary text.
///
/// Both inputs are case-folded before matching. Returns title-cased labels;
/// `("General", None)` when nothing matches.
pub fn infer_category(headline: &str, summary: &str) -> (String, Option<String>) {
    let text = format!("{} {}", headline.to_lowercase(), summary.to_lowercase());
    for (label, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| text.contains(kw)) {
            return match label.split_once(':') {
                Some((main, sub)) => (capitalize(main), Some(capitalize(sub))),
                None => (capitalize(label), None),
            };
        }
    }
    ("General".to_string(), None)
}

/// Infer up to five tags from headline and summary by token frequency.
///
/// Tokens are whitespace-split, trimmed of trailing punctuation, kept only if
/// the raw token is longer than four characters, and title-cased before
/// counting. Ties rank by first appearance.
pub fn infer_tags(headline: &str, summary: &str) -> Vec<String> {
    let text = format!("{headline} {summary}");
    let mut order: Vec<String> = Vec::new();
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for token in text.split_whitespace() {
        if token.len() <= 4 {
            continue;
        }
        let word = capitalize(token.trim_matches(|c| ".,!?".contains(c)));
        if word.is_empty() {
            continue;
        }
        let count = counts.entry(word.clone()).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = order
        .into_iter()
        .enumerate()
        .map(|(first_seen, w)| {
            let count = counts[&w];
            (w, count, first_seen)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(5).map(|(w, _, _)| w).collect()
}

/// Split a comma-separated tag reply into raw tag strings.
pub fn split_tags(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop tags that are empty, over-length, boilerplate, or don't start with a
/// letter.
pub fn sanitize_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .filter(|tag| {
            let len = tag.chars().count();
            if len <= 1 || len >= 40 {
                return false;
            }
            let lower = tag.to_lowercase();
            if TAG_BOILERPLATE.iter().any(|frag| lower.contains(frag)) {
                return false;
            }
            tag.chars().next().is_some_and(|c| c.is_alphabetic())
        })
        .collect()
}

/// Clean a rewritten headline or summary: strip markdown bold markers and
/// characters outside the plain-prose set, and collapse whitespace runs.
pub fn clean_text(text: &str) -> String {
    let text = MARKDOWN_BOLD.replace_all(text, "");
    let text = DISALLOWED_CHARS.replace_all(&text, "");
    WHITESPACE_RUN.replace_all(&text, " ").trim().to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_market_headline_is_business() {
        let (cat, sub) = infer_category("Stock market rallies", "");
        assert_eq!(cat, "Business");
        assert_eq!(sub, None);
    }

    #[test]
    fn first_label_in_declaration_order_wins() {
        // "football" appears in both `sports` and `sports:football`; the
        // earlier plain entry wins.
        let (cat, sub) = infer_category("Football club sold", "");
        assert_eq!(cat, "Sports");
        assert_eq!(sub, None);
    }

    #[test]
    fn subcategory_labels_are_reachable() {
        // "premier league" is only in sports:football and trips no earlier
        // keyword set.
        let (cat, sub) = infer_category("Premier League title chase narrows", "");
        assert_eq!(cat, "Sports");
        assert_eq!(sub, Some("Football".to_string()));
    }

    #[test]
    fn no_match_falls_back_to_general() {
        let (cat, sub) = infer_category("Quiet afternoon everywhere", "");
        assert_eq!(cat, "General");
        assert_eq!(sub, None);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let (cat, _) = infer_category("ELECTION NIGHT", "GOVERNMENT FORMS");
        assert_eq!(cat, "Politics");
    }

    #[test]
    fn infer_tags_ranks_by_frequency_then_first_seen() {
        let tags = infer_tags(
            "Budget airline expands budget routes",
            "airline orders planes, airline hires crews for routes",
        );
        // "airline" x3, "budget" x2, "routes" x2 (budget seen first), then
        // singletons in appearance order.
        assert_eq!(tags[0], "Airline");
        assert_eq!(tags[1], "Budget");
        assert_eq!(tags[2], "Routes");
        assert_eq!(tags.len(), 5);
    }

    #[test]
    fn infer_tags_skips_short_tokens_and_strips_punctuation() {
        let tags = infer_tags("Storm nears coast!", "Heavy rains expected.");
        assert!(tags.contains(&"Storm".to_string()));
        assert!(tags.contains(&"Rains".to_string()));
        assert!(tags.iter().all(|t| !t.ends_with('!') && !t.ends_with('.')));
        // "nears" survives (5 chars), "coast!" counts its raw length of 6.
        assert!(tags.contains(&"Coast".to_string()));
    }

    #[test]
    fn sanitize_drops_boilerplate_and_non_letter_tags() {
        let tags = vec![
            "Politics".to_string(),
            "Here are 5 tags for the article".to_string(),
            "1989".to_string(),
            "a".to_string(),
            "x".repeat(40),
            "Economy".to_string(),
        ];
        assert_eq!(sanitize_tags(tags), vec!["Politics", "Economy"]);
    }

    #[test]
    fn split_tags_trims_and_drops_empties() {
        assert_eq!(
            split_tags(" Politics , Economy ,, Trade "),
            vec!["Politics", "Economy", "Trade"]
        );
    }

    #[test]
    fn clean_text_strips_markup_and_collapses_whitespace() {
        assert_eq!(
            clean_text("**Markets**  rally   🚀 on rate 'pause'"),
            "Markets rally on rate 'pause'"
        );
    }
}
