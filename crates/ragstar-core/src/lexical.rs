//! In-memory Okapi BM25 index over repository summaries
//!
//! Every mutation takes the write lock for its whole duration, so readers
//! always score against a fully applied set of statistics.

use std::cmp::Ordering;
use std::collections::HashMap;

use parking_lot::RwLock;

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Case-fold and split on non-alphanumeric boundaries
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default)]
struct DocStats {
    term_freqs: HashMap<String, u32>,
    len: usize,
}

#[derive(Debug, Default)]
struct Corpus {
    docs: HashMap<String, DocStats>,
    doc_freqs: HashMap<String, usize>,
    total_len: usize,
}

impl Corpus {
    fn insert(&mut self, doc_id: &str, text: &str) {
        self.remove(doc_id);

        let tokens = tokenize(text);
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for term in term_freqs.keys() {
            *self.doc_freqs.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += tokens.len();
        self.docs.insert(
            doc_id.to_string(),
            DocStats {
                term_freqs,
                len: tokens.len(),
            },
        );
    }

    fn remove(&mut self, doc_id: &str) -> bool {
        let Some(stats) = self.docs.remove(doc_id) else {
            return false;
        };
        for term in stats.term_freqs.keys() {
            if let Some(df) = self.doc_freqs.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freqs.remove(term);
                }
            }
        }
        self.total_len -= stats.len;
        true
    }

    fn avg_doc_len(&self) -> f64 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f64 / self.docs.len() as f64
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn score(&self, params: Bm25Params, query_tokens: &[String], doc: &DocStats) -> f64 {
        let avgdl = self.avg_doc_len();
        let length_ratio = if avgdl > 0.0 {
            doc.len as f64 / avgdl
        } else {
            0.0
        };

        query_tokens
            .iter()
            .filter_map(|term| {
                let tf = f64::from(*doc.term_freqs.get(term)?);
                let numerator = tf * (params.k1 + 1.0);
                let denominator =
                    tf + params.k1 * (1.0 - params.b + params.b * length_ratio);
                Some(self.idf(term) * numerator / denominator)
            })
            .sum()
    }
}

/// BM25 index keyed by repository name
#[derive(Debug, Default)]
pub struct LexicalIndex {
    params: Bm25Params,
    corpus: RwLock<Corpus>,
}

impl LexicalIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            corpus: RwLock::new(Corpus::default()),
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Insert or fully replace the statistics of a document
    pub fn upsert(&self, doc_id: &str, text: &str) {
        self.corpus.write().insert(doc_id, text);
        log::debug!("[Lexical] Upserted {}", doc_id);
    }

    /// Remove a document. Returns whether it was present.
    pub fn delete(&self, doc_id: &str) -> bool {
        self.corpus.write().remove(doc_id)
    }

    pub fn clear(&self) {
        *self.corpus.write() = Corpus::default();
    }

    /// Replace the whole corpus in one step
    pub fn rebuild<'a, I>(&self, docs: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut corpus = Corpus::default();
        for (doc_id, text) in docs {
            corpus.insert(doc_id, text);
        }
        let count = corpus.docs.len();
        *self.corpus.write() = corpus;
        log::info!("[Lexical] Rebuilt index with {} documents", count);
    }

    /// Score one document, `None` if it is not indexed
    pub fn score(&self, query_tokens: &[String], doc_id: &str) -> Option<f64> {
        let corpus = self.corpus.read();
        let doc = corpus.docs.get(doc_id)?;
        Some(corpus.score(self.params, query_tokens, doc))
    }

    /// Top `top_k` documents with a positive score, descending by score,
    /// ties broken by ascending name
    pub fn query(&self, query_text: &str, top_k: usize) -> Vec<(String, f64)> {
        let query_tokens = tokenize(query_text);
        if query_tokens.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let corpus = self.corpus.read();
        let mut scored: Vec<(String, f64)> = corpus
            .docs
            .iter()
            .map(|(doc_id, doc)| (doc_id, corpus.score(self.params, &query_tokens, doc)))
            .filter(|(_, score)| *score > 0.0)
            .map(|(doc_id, score)| (doc_id.clone(), score))
            .collect();
        drop(corpus);

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }

    pub fn len(&self) -> usize {
        self.corpus.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.corpus.read().docs.contains_key(doc_id)
    }

    /// Number of documents containing `term` (already case-folded)
    pub fn document_frequency(&self, term: &str) -> usize {
        self.corpus.read().doc_freqs.get(term).copied().unwrap_or(0)
    }

    pub fn avg_doc_len(&self) -> f64 {
        self.corpus.read().avg_doc_len()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.corpus.read().doc_freqs.len()
    }
}
