//! Synonym expander (C6).
//!
//! Backed by a static `term -> [synonyms]` dictionary loaded once at
//! startup from a JSON file (spec §6's "Synonym dictionary" persisted
//! format). Expansion applies to the BM25 path only — the vector path
//! embeds the raw query.
//!
//! Grounded on `original_source/worker/services/query_expansion_service.py`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Probe terms used to decide whether a query belongs to the "technical"
/// vocabulary, which gets a larger synonym budget in the smart variant.
const TECHNICAL_PROBES: &[&str] = &[
    "api", "сервер", "база данных", "бд", "код", "скрипт", "конфигурация", "сеть", "протокол",
    "интеграция", "деплой", "репозиторий",
];

fn term_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w{2,}\b").unwrap())
}

#[derive(Debug, Clone, Default)]
pub struct SynonymExpander {
    dictionary: HashMap<String, Vec<String>>,
}

impl SynonymExpander {
    /// Load the dictionary from `path`. A missing file yields an empty
    /// (no-op) expander rather than an error — expansion is an
    /// optimization, not a correctness requirement.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "synonym dictionary not found, expansion disabled");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read synonym dictionary: {}", path.display()))?;
        let dictionary: HashMap<String, Vec<String>> =
            serde_json::from_str(&content).context("failed to parse synonym dictionary JSON")?;
        Ok(Self { dictionary })
    }

    /// Extract candidate terms: every word of length >= 2, plus every
    /// bigram/trigram of consecutive words.
    fn extract_terms(query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        let words: Vec<&str> = term_re().find_iter(&lower).map(|m| m.as_str()).collect();

        let mut terms: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        for i in 0..words.len().saturating_sub(1) {
            terms.push(format!("{} {}", words[i], words[i + 1]));
            if i + 2 < words.len() {
                terms.push(format!("{} {} {}", words[i], words[i + 1], words[i + 2]));
            }
        }
        terms
    }

    fn is_technical(query: &str) -> bool {
        let lower = query.to_lowercase();
        TECHNICAL_PROBES.iter().any(|p| lower.contains(p))
    }

    /// Expand `query` with up to `max_synonyms_per_term` synonyms per
    /// matched term: `expanded = original + " " + join(selected)`.
    pub fn expand(&self, query: &str, max_synonyms_per_term: usize) -> String {
        if self.dictionary.is_empty() {
            return query.to_string();
        }

        let mut selected: Vec<String> = Vec::new();
        for term in Self::extract_terms(query) {
            if let Some(synonyms) = self.dictionary.get(&term) {
                selected.extend(synonyms.iter().take(max_synonyms_per_term).cloned());
            }
        }

        if selected.is_empty() {
            return query.to_string();
        }
        format!("{query} {}", selected.join(" "))
    }

    /// "Smart" variant: adaptively picks 3 synonyms/term for technical
    /// queries, 2 otherwise, per spec §4.6.
    pub fn expand_smart(&self, query: &str) -> String {
        let budget = if Self::is_technical(query) { 3 } else { 2 };
        self.expand(query, budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expander() -> SynonymExpander {
        let mut dictionary = HashMap::new();
        dictionary.insert("копирайтер".to_string(), vec!["райтер".to_string(), "автор текстов".to_string()]);
        SynonymExpander { dictionary }
    }

    #[test]
    fn expands_matched_term() {
        let exp = expander();
        let expanded = exp.expand("кто такой копирайтер", 2);
        assert!(expanded.contains("райтер"));
        assert!(expanded.starts_with("кто такой копирайтер"));
    }

    #[test]
    fn leaves_unmatched_query_unchanged() {
        let exp = expander();
        let expanded = exp.expand("случайный запрос без терминов", 2);
        assert_eq!(expanded, "случайный запрос без терминов");
    }

    #[test]
    fn smart_variant_uses_larger_budget_for_technical_terms() {
        let mut dictionary = HashMap::new();
        dictionary.insert(
            "api".to_string(),
            vec!["интерфейс".to_string(), "эндпоинт".to_string(), "контракт".to_string()],
        );
        let exp = SynonymExpander { dictionary };
        let expanded = exp.expand_smart("как работает api");
        assert!(expanded.contains("контракт"));
    }

    #[test]
    fn empty_dictionary_is_noop() {
        let exp = SynonymExpander::default();
        assert_eq!(exp.expand_smart("что угодно"), "что угодно");
    }
}
