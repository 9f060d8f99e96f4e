//! Morphological tokenizer (C5).
//!
//! Lemmatizes and stop-word-filters queries and documents, preserving
//! dates/years/numbers as special tokens. Used on both the BM25 indexing
//! path and the query path — they MUST share this implementation so
//! lexical scoring is comparable.
//!
//! Grounded on `original_source/worker/services/search_service.py`'s
//! `_improved_tokenize`, which lemmatizes with `pymorphy3`. This port
//! replaces the dictionary-backed morphological analyzer with a
//! rule-based suffix stripper — per spec §9's design note, "any backend
//! producing equivalent lemmas on a representative corpus is acceptable".

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

const DATE_TOKEN: &str = "DATE";
const NUMBER_TOKEN: &str = "NUMBER";

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap())
}

fn euro_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{2}\.\d{2}\.\d{4}\b").unwrap())
}

fn decimal_not_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:(?!(?:19|20)\d{2}\b)\d+\.\d+)\b").unwrap())
}

fn split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w-]+").unwrap())
}

fn four_digit_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}$").unwrap())
}

fn stop_words() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "и", "в", "во", "не", "что", "он", "на", "я", "с", "со", "как", "а", "то", "все",
            "она", "так", "его", "но", "да", "ты", "к", "у", "же", "вы", "за", "бы", "по",
            "только", "её", "мне", "быть", "вот", "от", "меня", "ещё", "нет", "о", "из", "ему",
            "теперь", "когда", "даже", "ну", "вдруг", "ли", "если", "уже", "или", "ни", "был",
            "него", "до", "вас", "нибудь", "опять", "уж", "вам", "ведь", "там", "потом", "себя",
            "ничто", "ей", "мочь", "они", "тут", "где", "есть", "надо", "ней", "для", "мы",
            "тебя", "их", "чем", "сам", "чтобы", "без", "будто", "чего", "раз", "тоже", "под",
            "будет", "ж", "тогда", "кто", "этот", "тот", "потому", "какой", "совсем", "здесь",
            "один", "почти", "мой", "тем", "сейчас", "куда", "зачем", "весь", "никогда",
            "можно", "при", "наконец", "два", "об", "другой", "хоть", "после", "над", "большой",
            "через", "наш", "про", "много", "разве", "три", "впрочем", "хороший", "свой",
            "перед", "иногда", "лучше", "чуть", "нельзя", "такой", "более", "всегда", "конечно",
            "между",
        ]
        .into_iter()
        .collect()
    })
}

/// Suffix strip table for a crude Russian lemmatizer: longest matching
/// suffix wins, in order, and is stripped provided the stem that remains
/// is at least 2 characters long.
const NOUN_ADJ_SUFFIXES: &[&str] = &[
    "ами", "ями", "ого", "его", "ому", "ему", "ыми", "ими", "ах", "ях", "ов", "ев", "ей", "ий",
    "ый", "ая", "яя", "ое", "ее", "ую", "юю", "ы", "и", "а", "я", "у", "ю", "о", "е",
];

/// Lemmatize a single lowercase token by stripping the longest matching
/// inflectional suffix. Pure heuristic: no dictionary lookup, so it is
/// stable and allocation-light, but not linguistically exact.
fn lemmatize(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    for suffix in NOUN_ADJ_SUFFIXES {
        let suffix_len = suffix.chars().count();
        if chars.len() > suffix_len + 1 {
            let tail: String = chars[chars.len() - suffix_len..].iter().collect();
            if tail == *suffix {
                return chars[..chars.len() - suffix_len].iter().collect();
            }
        }
    }
    token.to_string()
}

/// Tokenize and lemmatize `text` per spec §4.5's eight-step pipeline.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let lower = iso_date_re().replace_all(&lower, DATE_TOKEN);
    let lower = euro_date_re().replace_all(&lower, DATE_TOKEN);
    let lower = decimal_not_year_re().replace_all(&lower, NUMBER_TOKEN);

    let raw_tokens: Vec<&str> = split_re().split(&lower).filter(|t| !t.is_empty()).collect();

    let mut out = Vec::new();
    for tok in raw_tokens {
        if tok.chars().count() < 2 {
            continue;
        }
        if tok == DATE_TOKEN.to_lowercase() || tok == NUMBER_TOKEN.to_lowercase() {
            out.push(tok.to_uppercase());
            continue;
        }
        if four_digit_year_re().is_match(tok) {
            out.push(tok.to_string());
            continue;
        }

        if tok.contains('-') && tok.chars().count() > 3 {
            for part in tok.split('-') {
                if part.chars().count() >= 2 {
                    push_lemma(&mut out, part);
                }
            }
        } else {
            push_lemma(&mut out, tok);
        }
    }
    out
}

fn push_lemma(out: &mut Vec<String>, token: &str) {
    let lemma = lemmatize(token);
    if stop_words().contains(lemma.as_str()) {
        return;
    }
    if lemma.chars().all(|c| c.is_ascii_digit()) {
        return;
    }
    out.push(lemma);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_iso_date() {
        let tokens = tokenize("Документ от 2024-01-15 готов");
        assert!(tokens.contains(&"DATE".to_string()));
    }

    #[test]
    fn preserves_euro_date() {
        let tokens = tokenize("подписан 15.01.2024 сегодня");
        assert!(tokens.contains(&"DATE".to_string()));
    }

    #[test]
    fn preserves_four_digit_year() {
        let tokens = tokenize("отчет за 2023 год");
        assert!(tokens.contains(&"2023".to_string()));
    }

    #[test]
    fn replaces_decimal_number_but_not_year() {
        let tokens = tokenize("вес 12.5 кг в 2023 году");
        assert!(tokens.contains(&"NUMBER".to_string()));
        assert!(tokens.contains(&"2023".to_string()));
    }

    #[test]
    fn drops_short_tokens_and_stopwords() {
        let tokens = tokenize("я и он");
        assert!(tokens.is_empty());
    }

    #[test]
    fn splits_hyphenated_compound() {
        let tokens = tokenize("интернет-магазин работает");
        assert!(!tokens.is_empty());
    }

    #[test]
    fn deterministic_for_same_input() {
        let a = tokenize("Копирайтер отвечает за тексты.");
        let b = tokenize("Копирайтер отвечает за тексты.");
        assert_eq!(a, b);
    }
}
