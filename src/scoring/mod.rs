//! BM25 relevance scoring.
//!
//! Computes `idf = ln((N - df + 0.5) / (df + 0.5) + 1.0)` and a per-term
//! `tf * (k1+1) / (tf + k1*norm)` contribution (the engine's
//! `EngineConfig::bm25` defaults to k1=1.2, b=0.75), then adds per-field
//! boost and multi-term, multi-field summation across a query.

use crate::config::BM25Config;
use crate::postings::DocId;

/// One term's contribution to scoring a single field.
pub struct TermStat {
    pub document_frequency: u64,
    pub term_frequency: u32,
}

pub struct BM25Scorer {
    config: BM25Config,
}

impl BM25Scorer {
    pub fn new(config: BM25Config) -> Self {
        Self { config }
    }

    /// Inverse document frequency for a term that appears in `df` of `total_docs`
    /// documents. Never negative: the `+1` inside the log keeps it non-negative
    /// even when a term appears in more than half the corpus.
    pub fn idf(&self, total_docs: u64, document_frequency: u64) -> f32 {
        let n = total_docs as f32;
        let df = document_frequency as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score a single term's occurrence in one field of one document.
    pub fn term_score(&self, total_docs: u64, stat: &TermStat, field_length: u32, avg_field_length: f32, boost: f32) -> f32 {
        if stat.term_frequency == 0 {
            return 0.0;
        }
        let idf = self.idf(total_docs, stat.document_frequency);
        let tf = stat.term_frequency as f32;
        let norm = if avg_field_length > 0.0 {
            1.0 - self.config.b + self.config.b * (field_length as f32 / avg_field_length)
        } else {
            1.0
        };
        let tf_norm = tf / (tf + self.config.k1 * norm);
        boost * idf * tf_norm
    }

    /// Sum term scores across the terms of a single query clause against one
    /// field, e.g. for a multi-word `match` query.
    pub fn field_score(
        &self,
        total_docs: u64,
        field_length: u32,
        avg_field_length: f32,
        boost: f32,
        term_stats: &[TermStat],
    ) -> f32 {
        term_stats
            .iter()
            .map(|stat| self.term_score(total_docs, stat, field_length, avg_field_length, boost))
            .sum()
    }
}

/// Accumulates per-document scores across multiple query clauses and fields,
/// keeping doc insertion order stable for the evaluator's tie-break rule.
#[derive(Debug, Default)]
pub struct ScoreAccumulator {
    scores: std::collections::HashMap<DocId, f32>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, doc_id: DocId, score: f32) {
        *self.scores.entry(doc_id).or_insert(0.0) += score;
    }

    pub fn get(&self, doc_id: DocId) -> f32 {
        self.scores.get(&doc_id).copied().unwrap_or(0.0)
    }

    pub fn into_sorted(self) -> Vec<(DocId, f32)> {
        let mut entries: Vec<(DocId, f32)> = self.scores.into_iter().collect();
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idf_is_nonnegative_for_common_term() {
        let scorer = BM25Scorer::new(BM25Config::default());
        let idf = scorer.idf(100, 90);
        assert!(idf >= 0.0);
    }

    #[test]
    fn test_idf_higher_for_rare_term() {
        let scorer = BM25Scorer::new(BM25Config::default());
        let rare = scorer.idf(1000, 1);
        let common = scorer.idf(1000, 500);
        assert!(rare > common);
    }

    #[test]
    fn test_term_score_zero_for_absent_term() {
        let scorer = BM25Scorer::new(BM25Config::default());
        let stat = TermStat { document_frequency: 10, term_frequency: 0 };
        assert_eq!(scorer.term_score(100, &stat, 20, 15.0, 1.0), 0.0);
    }

    #[test]
    fn test_term_score_scales_with_boost() {
        let scorer = BM25Scorer::new(BM25Config::default());
        let stat = TermStat { document_frequency: 10, term_frequency: 3 };
        let base = scorer.term_score(100, &stat, 20, 15.0, 1.0);
        let boosted = scorer.term_score(100, &stat, 20, 15.0, 2.0);
        assert!((boosted - base * 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_score_accumulator_sums_across_clauses() {
        let mut acc = ScoreAccumulator::new();
        acc.add(1, 0.5);
        acc.add(1, 0.3);
        acc.add(2, 0.9);
        assert!((acc.get(1) - 0.8).abs() < 1e-6);

        let sorted = acc.into_sorted();
        assert_eq!(sorted[0].0, 2);
    }

    #[test]
    fn test_score_accumulator_tie_breaks_by_doc_id() {
        let mut acc = ScoreAccumulator::new();
        acc.add(5, 1.0);
        acc.add(2, 1.0);
        let sorted = acc.into_sorted();
        assert_eq!(sorted[0].0, 2);
        assert_eq!(sorted[1].0, 5);
    }
}
