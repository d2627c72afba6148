// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `JsonValue` sum type and the secret-taxonomy helpers built on top of it.
//!
//! Every input, every step output and every persisted field in the core passes
//! through `serde_json::Value`. We alias it rather than defining a parallel
//! enum: the closed sum type the spec describes (`string | number | boolean |
//! null | sequence | mapping`) is exactly what `serde_json::Value` already is,
//! and a parallel type would only add conversion boilerplate at every
//! boundary.

use std::collections::HashSet;

/// The value type threaded through inputs, step outputs and persisted state.
pub type JsonValue = serde_json::Value;

/// Declared primitive type tag for a workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl InputType {
    /// Checks whether a resolved value matches its declared type tag.
    pub fn matches(&self, value: &JsonValue) -> bool {
        match self {
            InputType::String => value.is_string(),
            InputType::Number => value.is_number(),
            InputType::Boolean => value.is_boolean(),
            InputType::Object => value.is_object(),
            InputType::Array => value.is_array(),
        }
    }
}

/// A value considered "defined and non-empty" for the purposes of the
/// submission validation in spec §4.5 ("every declared input is supplied
/// with a defined, non-empty value").
pub fn is_present(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
        _ => true,
    }
}

/// Formats a `JsonValue` for substitution into a string-context template
/// field, per spec §4.2: null/undefined becomes empty string, primitives
/// take their natural text form, composites are serialized as JSON text.
pub fn format_for_string_context(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Formats a `JsonValue` for the `file` step's write action, per spec §4.1:
/// same primitive rules as `format_for_string_context`, but non-string
/// content is stringified with indentation rather than compact JSON.
pub fn format_for_file_content(value: &JsonValue) -> String {
    match value {
        JsonValue::Array(_) | JsonValue::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
        other => format_for_string_context(other),
    }
}

/// The set of secret string values accumulated while resolving a template.
///
/// Longest-first ordering is preserved by `mask` so that a shorter secret
/// that happens to be a substring of a longer one never partially unmasks it.
#[derive(Debug, Clone, Default)]
pub struct SecretValues(HashSet<String>);

impl SecretValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.0.insert(value);
        }
    }

    pub fn extend(&mut self, other: &SecretValues) {
        for value in &other.0 {
            self.0.insert(value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_in(&self, haystack: &str) -> bool {
        self.0.iter().any(|secret| haystack.contains(secret.as_str()))
    }

    /// Masks every occurrence of every tracked secret value in `text`,
    /// longest secret first so containment doesn't leave a partial unmask.
    pub fn mask(&self, text: &str) -> String {
        let mut ordered: Vec<&String> = self.0.iter().collect();
        ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let mut masked = text.to_string();
        for secret in ordered {
            if secret.is_empty() {
                continue;
            }
            let token = mask_token(secret);
            masked = masked.replace(secret.as_str(), &token);
        }
        masked
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

/// Produces the mask token for a single secret value, per spec §4.2: short or
/// empty values mask to the bare token; values longer than four characters
/// retain their first character.
fn mask_token(secret: &str) -> String {
    const TOKEN: &str = "***REDACTED***";
    if secret.chars().count() > 4 {
        let first = secret.chars().next().unwrap_or_default();
        format!("{first}{TOKEN}")
    } else {
        TOKEN.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_type_matches() {
        assert!(InputType::String.matches(&json!("hi")));
        assert!(!InputType::String.matches(&json!(1)));
        assert!(InputType::Array.matches(&json!([1, 2])));
    }

    #[test]
    fn presence_rules() {
        assert!(!is_present(&JsonValue::Null));
        assert!(!is_present(&json!("")));
        assert!(!is_present(&json!([])));
        assert!(!is_present(&json!({})));
        assert!(is_present(&json!(0)));
        assert!(is_present(&json!(false)));
        assert!(is_present(&json!("x")));
    }

    #[test]
    fn masks_longest_first_to_avoid_partial_containment() {
        let mut secrets = SecretValues::new();
        secrets.insert("admin:s3cr3t");
        secrets.insert("s3cr3t");

        let masked = secrets.mask("curl -u admin:s3cr3t https://example.org");
        assert!(!masked.contains("s3cr3t"));
    }

    #[test]
    fn short_secret_masks_to_bare_token() {
        let mut secrets = SecretValues::new();
        secrets.insert("ab");
        let masked = secrets.mask("value is ab here");
        assert_eq!(masked, "value is ***REDACTED*** here");
    }
}
