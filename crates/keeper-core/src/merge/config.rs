//! Field-enablement configuration.
//!
//! Externally supplied, per panel: the set of field base names allowed to
//! persist, an optional multi-row flag per field, and dynamically declared
//! sub-item lists. The merge engine guarantees its output is a subset of
//! this schema regardless of what an upstream producer sends.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Enablement of a single field base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Whether the field is allowed to persist.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Whether the field merges with append semantics instead of overwrite.
    #[serde(default)]
    pub multi_row: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for FieldRule {
    fn default() -> Self {
        Self {
            enabled: true,
            multi_row: false,
        }
    }
}

impl FieldRule {
    /// A plain enabled, single-row field.
    pub fn enabled() -> Self {
        Self::default()
    }

    /// An enabled multi-row field.
    pub fn multi_row() -> Self {
        Self {
            enabled: true,
            multi_row: true,
        }
    }

    /// A disabled field.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            multi_row: false,
        }
    }
}

/// Enablement of one panel's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelRule {
    /// Explicit per-field rules, keyed by base field name.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,
    /// Dynamically declared sub-item base names, enabled in addition to the
    /// explicit rules (always single-row).
    #[serde(default)]
    pub extra_items: Vec<String>,
}

impl PanelRule {
    /// The set of base names allowed to persist for this panel.
    pub fn enabled_base_names(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self
            .fields
            .iter()
            .filter(|(_, rule)| rule.enabled)
            .map(|(name, _)| name.as_str())
            .collect();
        names.extend(self.extra_items.iter().map(String::as_str));
        names
    }

    /// Whether `base` merges with append semantics.
    pub fn is_multi_row(&self, base: &str) -> bool {
        self.fields
            .get(base)
            .map(|rule| rule.enabled && rule.multi_row)
            .unwrap_or(false)
    }
}

/// The complete field-enablement configuration, keyed by panel name.
///
/// A panel with no entry here is unconfigured: the merge engine accepts
/// non-empty incoming data for it wholesale (lenient default favoring
/// forward progress over silent loss).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnablementConfig {
    /// Per-panel rules.
    #[serde(default)]
    pub panels: BTreeMap<String, PanelRule>,
}

impl EnablementConfig {
    /// Convenience builder used heavily by tests: a panel rule from
    /// `(base_name, rule)` pairs.
    pub fn with_panel<I>(mut self, panel: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, FieldRule)>,
    {
        let rule = PanelRule {
            fields: fields
                .into_iter()
                .map(|(name, rule)| (name.to_string(), rule))
                .collect(),
            extra_items: Vec::new(),
        };
        self.panels.insert(panel.into(), rule);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_base_names_include_extra_items() {
        let mut rule = PanelRule::default();
        rule.fields.insert("age".into(), FieldRule::enabled());
        rule.fields.insert("name".into(), FieldRule::disabled());
        rule.extra_items.push("mood".into());

        let names = rule.enabled_base_names();
        assert!(names.contains("age"));
        assert!(names.contains("mood"));
        assert!(!names.contains("name"));
    }

    #[test]
    fn test_multi_row_requires_enabled() {
        let mut rule = PanelRule::default();
        rule.fields.insert(
            "notes".into(),
            FieldRule {
                enabled: false,
                multi_row: true,
            },
        );
        assert!(!rule.is_multi_row("notes"));
        assert!(!rule.is_multi_row("unknown"));
    }

    #[test]
    fn test_toml_shape() {
        let raw = r#"
            [panels.stats.fields.age]
            multi_row = false

            [panels.stats.fields.notes]
            multi_row = true
        "#;
        let config: EnablementConfig = toml::from_str(raw).unwrap();
        let rule = config.panels.get("stats").unwrap();
        assert!(rule.is_multi_row("notes"));
        assert!(rule.enabled_base_names().contains("age"));
    }
}
