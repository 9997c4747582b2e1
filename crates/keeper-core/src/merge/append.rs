//! Append-mode detection.
//!
//! Whether an incoming scalar means "add a row" or "replace the field" is a
//! textual heuristic, isolated behind [`AppendStrategy`] so it can be
//! replaced or tested independently of the merge algorithm.

use once_cell::sync::Lazy;
use regex::Regex;

/// How an incoming scalar value should be applied to a multi-row field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendDecision {
    /// Add a new row with this content (markers stripped).
    Append(String),
    /// Replace the field wholesale (backward-compatible overwrite).
    Overwrite,
}

/// Classifies incoming scalar values for multi-row fields.
pub trait AppendStrategy: Send + Sync {
    /// Decides whether `incoming` is an append or an overwrite.
    fn classify(&self, incoming: &str) -> AppendDecision;
}

static NUMBERED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s+").expect("numbered-list prefix regex"));
static BULLET_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*•]\s+").expect("bullet prefix regex"));

/// Default strategy: a small set of textual markers.
///
/// Recognized as appends: a leading `+`, an `append:`/`add:` prefix
/// (case-insensitive), a numbered-list prefix (`1. ` / `1) `), and a
/// bullet or dash prefix. Everything else overwrites.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerAppendStrategy;

impl AppendStrategy for MarkerAppendStrategy {
    fn classify(&self, incoming: &str) -> AppendDecision {
        let trimmed = incoming.trim_start();

        if let Some(rest) = trimmed.strip_prefix('+') {
            return AppendDecision::Append(rest.trim().to_string());
        }

        let lower = trimmed.to_lowercase();
        for prefix in ["append:", "add:"] {
            if lower.starts_with(prefix) {
                return AppendDecision::Append(trimmed[prefix.len()..].trim().to_string());
            }
        }

        if let Some(found) = NUMBERED_PREFIX.find(trimmed) {
            return AppendDecision::Append(trimmed[found.end()..].trim().to_string());
        }
        if let Some(found) = BULLET_PREFIX.find(trimmed) {
            return AppendDecision::Append(trimmed[found.end()..].trim().to_string());
        }

        AppendDecision::Overwrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(input: &str) -> AppendDecision {
        MarkerAppendStrategy.classify(input)
    }

    #[test]
    fn test_plus_marker() {
        assert_eq!(
            classify("+ found a silver key"),
            AppendDecision::Append("found a silver key".into())
        );
    }

    #[test]
    fn test_append_and_add_prefixes() {
        assert_eq!(
            classify("append: met the guard"),
            AppendDecision::Append("met the guard".into())
        );
        assert_eq!(
            classify("Add: crossed the bridge"),
            AppendDecision::Append("crossed the bridge".into())
        );
    }

    #[test]
    fn test_numbered_list_prefix() {
        assert_eq!(
            classify("3. reached the tower"),
            AppendDecision::Append("reached the tower".into())
        );
        assert_eq!(
            classify("12) reached the tower"),
            AppendDecision::Append("reached the tower".into())
        );
    }

    #[test]
    fn test_bullet_prefix() {
        assert_eq!(
            classify("- lost the map"),
            AppendDecision::Append("lost the map".into())
        );
        assert_eq!(
            classify("* lost the map"),
            AppendDecision::Append("lost the map".into())
        );
    }

    #[test]
    fn test_plain_text_overwrites() {
        assert_eq!(classify("calm and focused"), AppendDecision::Overwrite);
        // A dash without trailing whitespace is ordinary content.
        assert_eq!(classify("-5 degrees"), AppendDecision::Overwrite);
    }
}
