//! Hybrid ranking: BM25 + dense similarity
//!
//! Both candidate lists are min-max normalized over the candidates actually
//! returned, then blended linearly. A repository missing from one list gets
//! 0 for that signal.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::RankingConfig;
use crate::embedding::Embedder;
use crate::error::{SearchError, SearchResult};
use crate::record_store::SummaryRecordStore;
use crate::types::{MatchType, RankedRepo, SearchHit, SearchOptions, SearchResults};
use crate::vector_store::ScoreKind;

/// Parameters of one ranking call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankOptions {
    pub top_k: usize,
    pub bm25_weight: f64,
    pub dense_weight: f64,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            bm25_weight: 0.6,
            dense_weight: 0.4,
        }
    }
}

impl RankOptions {
    fn validate(&self) -> SearchResult<()> {
        for (name, weight) in [
            ("bm25_weight", self.bm25_weight),
            ("dense_weight", self.dense_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::InvalidInput(format!(
                    "{name} must be a non-negative number, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

/// Min-max scale scores into [0, 1].
///
/// With fewer than two distinct values every score maps to 1.0.
pub fn normalize(scores: &[(String, f64)]) -> HashMap<String, f64> {
    let (min, max) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, s)| {
            (lo.min(*s), hi.max(*s))
        });
    let range = max - min;

    scores
        .iter()
        .map(|(name, score)| {
            let normalized = if range > 0.0 && range.is_finite() {
                (score - min) / range
            } else {
                1.0
            };
            (name.clone(), normalized)
        })
        .collect()
}

/// Blend normalized scores over the union of candidates, best first, ties
/// broken by ascending name
pub fn blend(
    lexical: &HashMap<String, f64>,
    dense: &HashMap<String, f64>,
    bm25_weight: f64,
    dense_weight: f64,
) -> Vec<RankedRepo> {
    let names: BTreeSet<&String> = lexical.keys().chain(dense.keys()).collect();

    let mut ranked: Vec<RankedRepo> = names
        .into_iter()
        .map(|name| {
            let bm25 = lexical.get(name).copied();
            let dense_score = dense.get(name).copied();
            let matched_by = match (bm25.is_some(), dense_score.is_some()) {
                (true, true) => MatchType::Hybrid,
                (true, false) => MatchType::Keyword,
                _ => MatchType::Vector,
            };
            let bm25 = bm25.unwrap_or(0.0);
            let dense_score = dense_score.unwrap_or(0.0);
            RankedRepo {
                repo_name: name.clone(),
                score: bm25_weight * bm25 + dense_weight * dense_score,
                bm25_score: bm25,
                dense_score,
                matched_by,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.repo_name.cmp(&b.repo_name))
    });
    ranked
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Ranks repositories against a query
pub struct HybridRanker {
    store: Arc<SummaryRecordStore>,
    embedder: Arc<dyn Embedder>,
    config: RankingConfig,
}

impl HybridRanker {
    pub fn new(
        store: Arc<SummaryRecordStore>,
        embedder: Arc<dyn Embedder>,
        config: RankingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Options seeded from the configured defaults
    pub fn default_options(&self) -> RankOptions {
        RankOptions {
            top_k: self.config.default_limit,
            bm25_weight: self.config.bm25_weight,
            dense_weight: self.config.dense_weight,
        }
    }

    /// Top `top_k` repositories by blended score. An empty corpus or a
    /// query matching nothing gives an empty list.
    pub async fn rank(&self, query: &str, options: RankOptions) -> SearchResult<Vec<RankedRepo>> {
        options.validate()?;

        let query = query.trim();
        if query.is_empty() || options.top_k == 0 || self.store.lexical().is_empty() {
            return Ok(vec![]);
        }

        let candidate_k = self.config.candidate_k(options.top_k);
        let lexical_hits = self.store.lexical().query(query, candidate_k);

        let query_vector = self.embedder.embed(query).await?;
        let dense = self.store.dense();
        let orientation = match dense.score_kind() {
            ScoreKind::Similarity => 1.0,
            ScoreKind::Distance => -1.0,
        };
        let dense_hits: Vec<(String, f64)> = dense
            .query(&query_vector, candidate_k)
            .await?
            .into_iter()
            .map(|hit| (hit.repo_name, orientation * f64::from(hit.score)))
            .collect();

        log::debug!(
            "[Rank] '{}': {} lexical / {} dense candidates (k = {})",
            query,
            lexical_hits.len(),
            dense_hits.len(),
            candidate_k
        );

        let mut ranked = blend(
            &normalize(&lexical_hits),
            &normalize(&dense_hits),
            options.bm25_weight,
            options.dense_weight,
        );
        ranked.truncate(options.top_k);
        Ok(ranked)
    }

    /// Rank and hydrate the results with their stored records
    pub async fn search(&self, options: SearchOptions) -> SearchResult<SearchResults> {
        let defaults = self.default_options();
        let rank_options = RankOptions {
            top_k: options.limit.unwrap_or(defaults.top_k),
            bm25_weight: options.bm25_weight.unwrap_or(defaults.bm25_weight),
            dense_weight: options.dense_weight.unwrap_or(defaults.dense_weight),
        };

        let ranked = self.rank(&options.query, rank_options).await?;
        if ranked.is_empty() {
            return Ok(SearchResults::empty(options.query));
        }

        let mut results = Vec::with_capacity(ranked.len());
        for repo in ranked {
            // Deleted between ranking and hydration
            let Some(record) = self.store.get(&repo.repo_name).await? else {
                continue;
            };
            results.push(SearchHit {
                repo_name: repo.repo_name,
                url: record.url,
                score: repo.score,
                bm25_score: repo.bm25_score,
                dense_score: repo.dense_score,
                matched_by: repo.matched_by,
                summary: preview(&record.summary_text, self.config.preview_chars),
            });
        }

        let count = results.len();
        Ok(SearchResults {
            query: options.query,
            results,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    fn order(ranked: &[RankedRepo]) -> Vec<&str> {
        ranked.iter().map(|r| r.repo_name.as_str()).collect()
    }

    #[test]
    fn test_normalize_min_max() {
        let normalized = normalize(&scores(&[("a", 2.0), ("b", 4.0), ("c", 3.0)]));
        assert_eq!(normalized["a"], 0.0);
        assert_eq!(normalized["b"], 1.0);
        assert_eq!(normalized["c"], 0.5);
    }

    #[test]
    fn test_normalize_degenerate_sets() {
        assert!(normalize(&[]).is_empty());
        assert_eq!(normalize(&scores(&[("a", 0.3)]))["a"], 1.0);

        let flat = normalize(&scores(&[("a", 0.7), ("b", 0.7)]));
        assert_eq!(flat["a"], 1.0);
        assert_eq!(flat["b"], 1.0);

        // Negated distances normalize like similarities
        let distances = normalize(&scores(&[("near", -0.1), ("far", -0.9)]));
        assert_eq!(distances["near"], 1.0);
        assert_eq!(distances["far"], 0.0);
    }

    #[test]
    fn test_blend_union_and_match_type() {
        let lexical = normalize(&scores(&[("both", 5.0), ("kw", 1.0)]));
        let dense = normalize(&scores(&[("both", 0.9), ("vec", 0.5)]));
        let ranked = blend(&lexical, &dense, 0.6, 0.4);

        // "kw" and "vec" are the minimum of their own list, so both blend
        // to 0 and fall back to name order
        assert_eq!(order(&ranked), vec!["both", "kw", "vec"]);
        assert_eq!(ranked[0].matched_by, MatchType::Hybrid);
        assert!((ranked[0].score - 1.0).abs() < 1e-12);
        assert_eq!(ranked[1].matched_by, MatchType::Keyword);
        assert_eq!(ranked[1].dense_score, 0.0);
        assert_eq!(ranked[2].matched_by, MatchType::Vector);
        assert_eq!(ranked[2].bm25_score, 0.0);
        assert_eq!(ranked[2].score, 0.0);
    }

    #[test]
    fn test_blend_ties_break_by_name() {
        let lexical = normalize(&scores(&[("zeta", 1.0), ("alpha", 1.0)]));
        let ranked = blend(&lexical, &HashMap::new(), 0.6, 0.4);
        assert_eq!(order(&ranked), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_shifting_weight_toward_bm25_moves_toward_bm25_order() {
        let lexical = normalize(&scores(&[
            ("a", 9.0),
            ("b", 7.0),
            ("c", 4.0),
            ("d", 1.0),
            ("e", 3.0),
        ]));
        let dense = normalize(&scores(&[
            ("a", 0.1),
            ("b", 0.9),
            ("c", 0.95),
            ("d", 0.8),
            ("f", 0.6),
        ]));

        let position = |ranked: &[RankedRepo], name: &str| {
            ranked.iter().position(|r| r.repo_name == name).unwrap()
        };
        let bm25_value = |name: &str| lexical.get(name).copied().unwrap_or(0.0);

        let steps: Vec<Vec<RankedRepo>> = (0..=10)
            .map(|i| {
                let w = f64::from(i) / 10.0;
                blend(&lexical, &dense, w, 1.0 - w)
            })
            .collect();

        // Once a pair agrees with the BM25 order, more BM25 weight never
        // flips it back
        let names = ["a", "b", "c", "d", "e", "f"];
        for window in steps.windows(2) {
            let (before, after) = (&window[0], &window[1]);
            for x in names {
                for y in names {
                    if bm25_value(x) > bm25_value(y)
                        && position(before, x) < position(before, y)
                    {
                        assert!(
                            position(after, x) < position(after, y),
                            "{x} fell behind {y}"
                        );
                    }
                }
            }
        }

        // Pure BM25 weight reproduces the BM25 ordering of lexical hits
        let pure = &steps[10];
        assert_eq!(&order(pure)[..5], &["a", "b", "c", "e", "d"]);
    }

    #[test]
    fn test_preview_appends_ellipsis_only_when_cut() {
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ééé", 2), "éé...");
    }

    #[test]
    fn test_rank_options_reject_negative_weights() {
        let options = RankOptions {
            bm25_weight: -0.1,
            ..RankOptions::default()
        };
        assert!(options.validate().is_err());
        assert!(RankOptions::default().validate().is_ok());
    }
}
