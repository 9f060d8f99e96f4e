//! BM25 lexical index (C12).
//!
//! One index per access level (a document visible at level 40 is
//! indexed into every index for level >= its own, per spec §4.9's
//! cumulative-visibility rule), lazily built on first use and cached
//! through [`crate::cache::CacheStore`]. Held process-wide behind a
//! `RwLock` so concurrent queries share a built index instead of
//! rebuilding it per-request.
//!
//! Scoring follows the classic Okapi BM25 formula (`k1=1.5`, `b=0.75`),
//! matching `rank_bm25.BM25Okapi`'s defaults, which
//! `original_source/worker/services/search_service.py` used directly.
//! Grounded in structure on `other_examples`' `Bm25Searcher`
//! (lazy-build-with-backoff over an `Arc<RwLock<...>>` singleton map).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const K1: f32 = 1.5;
const B: f32 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Document {
    pub id: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    pub access_level: i32,
    doc_ids: Vec<String>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f32,
    term_doc_freq: HashMap<String, Vec<(usize, u32)>>,
    doc_freq: HashMap<String, u32>,
    num_docs: usize,
}

impl Bm25Index {
    pub fn build(access_level: i32, docs: Vec<Bm25Document>) -> Self {
        let num_docs = docs.len();
        let mut doc_ids = Vec::with_capacity(num_docs);
        let mut doc_lengths = Vec::with_capacity(num_docs);
        let mut term_doc_freq: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for (idx, doc) in docs.into_iter().enumerate() {
            doc_ids.push(doc.id);
            doc_lengths.push(doc.tokens.len());

            let mut term_counts: HashMap<String, u32> = HashMap::new();
            for token in doc.tokens {
                *term_counts.entry(token).or_insert(0) += 1;
            }
            for (term, count) in term_counts {
                term_doc_freq.entry(term.clone()).or_default().push((idx, count));
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let avg_doc_length = if num_docs == 0 {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f32 / num_docs as f32
        };

        Self { access_level, doc_ids, doc_lengths, avg_doc_length, term_doc_freq, doc_freq, num_docs }
    }

    pub fn is_empty(&self) -> bool {
        self.num_docs == 0
    }

    fn idf(&self, term: &str) -> f32 {
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
        let n = self.num_docs as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every document in the index against `query_tokens`, in
    /// index order (parallel to `doc_ids`).
    pub fn score_all(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.num_docs];
        if self.num_docs == 0 {
            return scores;
        }

        for term in query_tokens {
            let Some(postings) = self.term_doc_freq.get(term) else { continue };
            let idf = self.idf(term);
            for &(doc_idx, freq) in postings {
                let freq = freq as f32;
                let doc_len = self.doc_lengths[doc_idx] as f32;
                let denom = freq + K1 * (1.0 - B + B * doc_len / self.avg_doc_length.max(1.0));
                scores[doc_idx] += idf * (freq * (K1 + 1.0)) / denom;
            }
        }
        scores
    }

    /// Top `n` document ids by score, descending, ties broken by
    /// original insertion order.
    pub fn top_n(&self, query_tokens: &[String], n: usize) -> Vec<(String, f32)> {
        let scores = self.score_all(query_tokens);
        let mut ranked: Vec<(String, f32)> = self
            .doc_ids
            .iter()
            .cloned()
            .zip(scores)
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        ranked
    }
}

/// Process-wide registry of built indexes, one per access level.
#[derive(Default)]
pub struct Bm25Manager {
    indexes: RwLock<HashMap<i32, Arc<Bm25Index>>>,
}

impl Bm25Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached index for `access_level`, building it via
    /// `build` if absent. `build` is only invoked while holding the
    /// write lock, so concurrent callers for the same level never
    /// race to build it twice.
    pub async fn get_or_build<F, Fut>(&self, access_level: i32, build: F) -> Arc<Bm25Index>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Bm25Index>,
    {
        if let Some(existing) = self.indexes.read().await.get(&access_level) {
            return existing.clone();
        }

        let mut guard = self.indexes.write().await;
        if let Some(existing) = guard.get(&access_level) {
            return existing.clone();
        }
        let index = Arc::new(build().await);
        guard.insert(access_level, index.clone());
        index
    }

    pub async fn invalidate(&self, access_level: Option<i32>) {
        let mut guard = self.indexes.write().await;
        match access_level {
            Some(level) => {
                guard.remove(&level);
            }
            None => guard.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> Bm25Document {
        Bm25Document { id: id.to_string(), tokens: crate::tokenizer::tokenize(text) }
    }

    #[test]
    fn scores_higher_for_more_matching_terms() {
        let index = Bm25Index::build(
            10,
            vec![
                doc("a", "копирайтер пишет тексты для сайта"),
                doc("b", "бухгалтер считает налоги компании"),
            ],
        );
        let query = crate::tokenizer::tokenize("обязанности копирайтера");
        let scores = index.score_all(&query);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn empty_index_scores_nothing() {
        let index = Bm25Index::build(10, vec![]);
        assert!(index.is_empty());
        let scores = index.score_all(&["копирайтер".to_string()]);
        assert!(scores.is_empty());
    }

    #[test]
    fn unseen_term_contributes_zero() {
        let index = Bm25Index::build(10, vec![doc("a", "договор аренды помещения")]);
        let scores = index.score_all(&["совершенно".to_string(), "незнакомый".to_string()]);
        assert_eq!(scores, vec![0.0]);
    }

    #[test]
    fn top_n_excludes_zero_score_docs() {
        let index = Bm25Index::build(
            10,
            vec![doc("a", "договор аренды помещения"), doc("b", "инструкция по технике безопасности")],
        );
        let top = index.top_n(&crate::tokenizer::tokenize("договор аренды"), 5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "a");
    }

    #[tokio::test]
    async fn manager_builds_once_and_caches() {
        let manager = Bm25Manager::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let index = manager
            .get_or_build(10, || async move {
                calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Bm25Index::build(10, vec![doc("a", "договор")])
            })
            .await;
        assert_eq!(index.access_level, 10);

        let calls_clone2 = calls.clone();
        manager
            .get_or_build(10, || async move {
                calls_clone2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Bm25Index::build(10, vec![])
            })
            .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manager_invalidate_forces_rebuild() {
        let manager = Bm25Manager::new();
        manager.get_or_build(10, || async { Bm25Index::build(10, vec![]) }).await;
        manager.invalidate(Some(10)).await;
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        manager
            .get_or_build(10, || async move {
                calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Bm25Index::build(10, vec![])
            })
            .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
