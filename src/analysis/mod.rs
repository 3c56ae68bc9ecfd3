//! Text analysis: turning field values into indexable tokens.
//!
//! Ships three built-in analyzers (`standard`, `keyword`, `lowercase`) behind
//! an `AnalyzerRegistry` that resolves a mapping's analyzer name at index
//! time, the same from-name plugin-registry shape used for storage adapters.

use crate::error::{Result, SearchError};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

pub type Position = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: Position,
}

/// An analyzer turns a string into a sequence of tokens.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<Token>;
    fn name(&self) -> &str;
}

/// Splits on non-alphanumeric boundaries, lowercases. The default analyzer.
#[derive(Debug, Clone, Default)]
pub struct StandardAnalyzer;

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, s)| Token { text: s.to_string(), position: i as Position })
            .collect()
    }

    fn name(&self) -> &str {
        "standard"
    }
}

/// Treats the whole input as a single token, unmodified. Used for exact-
/// match fields like tags or ids.
#[derive(Debug, Clone, Default)]
pub struct KeywordAnalyzer;

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }
        vec![Token { text: text.to_string(), position: 0 }]
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Like `StandardAnalyzer`, but splits only on whitespace: punctuation stays
/// attached to the token it's adjacent to (`"U.S.A."` stays one token instead
/// of three).
#[derive(Debug, Clone, Default)]
pub struct LowercaseAnalyzer;

impl Analyzer for LowercaseAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        text.to_lowercase()
            .split_whitespace()
            .enumerate()
            .map(|(i, s)| Token { text: s.to_string(), position: i as Position })
            .collect()
    }

    fn name(&self) -> &str {
        "lowercase"
    }
}

/// Resolves analyzer names to instances. Built-ins are always registered;
/// callers may register additional analyzers under their own names.
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        let mut registry = Self { analyzers: HashMap::new() };
        registry.register(Arc::new(StandardAnalyzer));
        registry.register(Arc::new(KeywordAnalyzer));
        registry.register(Arc::new(LowercaseAnalyzer));
        registry
    }
}

impl AnalyzerRegistry {
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.name().to_string(), analyzer);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Analyzer>> {
        self.analyzers
            .get(name)
            .cloned()
            .ok_or_else(|| SearchError::UnknownAnalyzer(name.to_string()))
    }

    pub fn available(&self) -> Vec<&str> {
        self.analyzers.keys().map(|s| s.as_str()).collect()
    }
}

/// Flattens an arbitrary JSON document into `(field_path, tokens)` pairs
/// ready for indexing, applying `analyzer` to string leaves and normalizing
/// non-string leaves (numbers, booleans, dates) to their canonical string
/// form. Nested objects use "parent.child" paths; arrays concatenate their
/// elements' tokens with a position gap of one between elements so adjacent
/// array entries never falsely satisfy a phrase match.
pub fn flatten_and_tokenize(
    value: &JsonValue,
    path: &str,
    analyzer: &dyn Analyzer,
    out: &mut HashMap<String, Vec<Token>>,
) {
    match value {
        JsonValue::String(s) => {
            out.entry(path.to_string()).or_default().extend(analyzer.analyze(s));
        }
        JsonValue::Number(n) => {
            out.entry(path.to_string())
                .or_default()
                .push(Token { text: n.to_string(), position: 0 });
        }
        JsonValue::Bool(b) => {
            out.entry(path.to_string())
                .or_default()
                .push(Token { text: b.to_string(), position: 0 });
        }
        JsonValue::Null => {}
        JsonValue::Array(items) => {
            let mut position_offset = 0u32;
            for item in items {
                let mut sub = HashMap::new();
                flatten_and_tokenize(item, path, analyzer, &mut sub);
                for (sub_path, tokens) in sub {
                    let shifted = tokens.into_iter().map(|t| Token {
                        text: t.text,
                        position: t.position + position_offset,
                    });
                    out.entry(sub_path).or_default().extend(shifted);
                }
                position_offset += 1;
            }
        }
        JsonValue::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                flatten_and_tokenize(child, &child_path, analyzer, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_standard_analyzer_lowercases_and_splits() {
        let tokens = StandardAnalyzer.analyze("Hello, World!");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "hello");
        assert_eq!(tokens[1].text, "world");
    }

    #[test]
    fn test_keyword_analyzer_is_single_token() {
        let tokens = KeywordAnalyzer.analyze("New York");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "New York");
    }

    #[test]
    fn test_lowercase_analyzer_splits_whitespace_keeps_punctuation() {
        let tokens = LowercaseAnalyzer.analyze("U.S.A. Rocks!");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "u.s.a.");
        assert_eq!(tokens[1].text, "rocks!");
    }

    #[test]
    fn test_registry_unknown_analyzer_errors() {
        let registry = AnalyzerRegistry::default();
        let result = registry.get("nonexistent");
        assert!(matches!(result, Err(SearchError::UnknownAnalyzer(_))));
    }

    #[test]
    fn test_registry_resolves_builtins() {
        let registry = AnalyzerRegistry::default();
        assert!(registry.get("standard").is_ok());
        assert!(registry.get("keyword").is_ok());
        assert!(registry.get("lowercase").is_ok());
    }

    #[test]
    fn test_flatten_nested_object_uses_dotted_path() {
        let doc = json!({"author": {"name": "Ada Lovelace"}});
        let mut out = HashMap::new();
        flatten_and_tokenize(&doc, "", &StandardAnalyzer, &mut out);
        assert!(out.contains_key("author.name"));
    }

    #[test]
    fn test_flatten_array_offsets_positions() {
        let doc = json!({"tags": ["rust", "search"]});
        let mut out = HashMap::new();
        flatten_and_tokenize(&doc, "", &StandardAnalyzer, &mut out);
        let tokens = &out["tags"];
        assert_eq!(tokens.len(), 2);
        assert!(tokens[1].position > tokens[0].position);
    }

    #[test]
    fn test_flatten_number_and_bool() {
        let doc = json!({"year": 2024, "published": true});
        let mut out = HashMap::new();
        flatten_and_tokenize(&doc, "", &StandardAnalyzer, &mut out);
        assert_eq!(out["year"][0].text, "2024");
        assert_eq!(out["published"][0].text, "true");
    }
}
