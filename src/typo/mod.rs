//! Typo tolerance: expanding a query term to nearby dictionary terms.
//!
//! Bigram pre-filtering cuts the Damerau-Levenshtein candidate set before
//! paying for the O(len1*len2) distance matrix. Candidates come from the
//! term dictionary's per-index catalogue rather than a scan over every
//! persisted term, and the result is bounded to the 10 best candidates by
//! descending document frequency.

use crate::dictionary::TermDictionary;
use crate::error::Result;
use crate::stats::IndexStats;
use std::cmp::min;
use std::collections::HashSet;

const MAX_DISTANCE: u32 = 1;
const MAX_CANDIDATES: usize = 10;
const NGRAM_PREFILTER_THRESHOLD: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct TypoCandidate {
    pub field: String,
    pub term: String,
    pub edit_distance: u32,
    pub document_frequency: u64,
}

impl TypoCandidate {
    /// Per-candidate `should`-clause boost, per spec: `1 / (1 + edit_distance)`.
    pub fn boost(&self) -> f32 {
        1.0 / (1.0 + self.edit_distance as f32)
    }
}

pub struct TypoTolerance {
    dictionary: TermDictionary,
    document_frequency_floor: u64,
}

impl TypoTolerance {
    pub fn new(dictionary: TermDictionary) -> Self {
        Self { dictionary, document_frequency_floor: 1 }
    }

    pub fn with_floor(mut self, floor: u64) -> Self {
        self.document_frequency_floor = floor;
        self
    }

    /// Expand `query_term` in `field` (or across all catalogued fields when
    /// `field` is `None`, for `_all`-style queries) to up to 10 dictionary
    /// terms within Damerau-Levenshtein distance 1, ranked by descending
    /// document frequency.
    pub fn expand(&self, index: &str, field: Option<&str>, query_term: &str, stats: &IndexStats) -> Result<Vec<TypoCandidate>> {
        let catalogue = self.dictionary.catalogue_terms(index);
        let scoped: Vec<(String, String)> = match field {
            Some(f) => catalogue.into_iter().filter(|(cf, _)| cf == f).collect(),
            None => catalogue,
        };

        let pool: Vec<&str> = scoped.iter().map(|(_, t)| t.as_str()).collect();
        let fuzzy_terms = find_fuzzy_matches(query_term, &pool, MAX_DISTANCE);

        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        for (candidate_field, term) in scoped {
            if !fuzzy_terms.contains(term.as_str()) || term == query_term {
                continue;
            }
            if !seen.insert((candidate_field.clone(), term.clone())) {
                continue;
            }
            let df = stats.document_frequency(index, &candidate_field, &term)?;
            if df <= self.document_frequency_floor {
                continue;
            }
            let distance = damerau_levenshtein_distance(query_term, &term);
            candidates.push(TypoCandidate { field: candidate_field, term, edit_distance: distance, document_frequency: df });
        }

        candidates.sort_by(|a, b| b.document_frequency.cmp(&a.document_frequency));
        candidates.truncate(MAX_CANDIDATES);
        Ok(candidates)
    }
}

fn find_fuzzy_matches<'a>(query: &str, dictionary: &[&'a str], max_distance: u32) -> HashSet<&'a str> {
    if dictionary.len() < NGRAM_PREFILTER_THRESHOLD {
        return dictionary
            .iter()
            .filter(|term| damerau_levenshtein_distance(query, term) <= max_distance)
            .copied()
            .collect();
    }

    let query_ngrams = generate_ngrams(query, 2);
    let query_ngram_count = query_ngrams.len();
    let min_shared = query_ngram_count.saturating_sub(2 * max_distance as usize);

    dictionary
        .iter()
        .filter(|term| {
            let len_diff = (query.chars().count() as i32 - term.chars().count() as i32).unsigned_abs();
            if len_diff > max_distance {
                return false;
            }
            let term_ngrams = generate_ngrams(term, 2);
            count_shared_ngrams(&query_ngrams, &term_ngrams) >= min_shared
        })
        .filter(|term| damerau_levenshtein_distance(query, term) <= max_distance)
        .copied()
        .collect()
}

fn generate_ngrams(s: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < n {
        return vec![s.to_string()];
    }
    (0..=chars.len() - n).map(|i| chars[i..i + n].iter().collect()).collect()
}

fn count_shared_ngrams(a: &[String], b: &[String]) -> usize {
    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();
    set_a.intersection(&set_b).count()
}

pub fn damerau_levenshtein_distance(s1: &str, s2: &str) -> u32 {
    let chars1: Vec<char> = s1.chars().collect();
    let chars2: Vec<char> = s2.chars().collect();
    let len1 = chars1.len();
    let len2 = chars2.len();

    if len1 == 0 {
        return len2 as u32;
    }
    if len2 == 0 {
        return len1 as u32;
    }

    let mut matrix = vec![vec![0u32; len2 + 1]; len1 + 1];
    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i as u32;
    }
    for j in 0..=len2 {
        matrix[0][j] = j as u32;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if chars1[i - 1] == chars2[j - 1] { 0 } else { 1 };
            matrix[i][j] = min(
                min(matrix[i - 1][j] + 1, matrix[i][j - 1] + 1),
                matrix[i - 1][j - 1] + cost,
            );

            if i > 1 && j > 1 && chars1[i - 1] == chars2[j - 2] && chars1[i - 2] == chars2[j - 1] {
                matrix[i][j] = min(matrix[i][j], matrix[i - 2][j - 2] + 1);
            }
        }
    }

    matrix[len1][len2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::EmbeddedKv;
    use crate::postings::PostingList;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_env() -> (TempDir, TermDictionary, IndexStats) {
        let dir = TempDir::new().unwrap();
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(EmbeddedKv::open(dir.path()).unwrap());
        let dictionary = TermDictionary::new(kv.clone(), 1000, 10_000_000, 1_000_000, 1000);
        let stats = IndexStats::load(kv, "books").unwrap();
        (dir, dictionary, stats)
    }

    #[test]
    fn test_damerau_levenshtein_basic_distances() {
        assert_eq!(damerau_levenshtein_distance("rust", "rust"), 0);
        assert_eq!(damerau_levenshtein_distance("resturant", "restaurant"), 1);
        assert_eq!(damerau_levenshtein_distance("ab", "ba"), 1);
    }

    #[test]
    fn test_expand_finds_nearby_term() {
        let (_dir, dictionary, stats) = test_env();
        let mut posting = PostingList::new();
        posting.add(1, 1, None);
        dictionary.merge("books", "title", "restaurant", &posting).unwrap();
        stats.adjust_document_frequency("books", "title", "restaurant", 2).unwrap();

        let typo = TypoTolerance::new(dictionary);
        let candidates = typo.expand("books", Some("title"), "resturant", &stats).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].term, "restaurant");
        assert_eq!(candidates[0].edit_distance, 1);
    }

    #[test]
    fn test_expand_excludes_terms_below_df_floor() {
        let (_dir, dictionary, stats) = test_env();
        let mut posting = PostingList::new();
        posting.add(1, 1, None);
        dictionary.merge("books", "title", "restaurant", &posting).unwrap();
        // document_frequency left at 0, below the default floor of 1

        let typo = TypoTolerance::new(dictionary);
        let candidates = typo.expand("books", Some("title"), "resturant", &stats).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_candidate_boost_decreases_with_distance() {
        let close = TypoCandidate { field: "f".into(), term: "a".into(), edit_distance: 1, document_frequency: 5 };
        let far = TypoCandidate { field: "f".into(), term: "b".into(), edit_distance: 0, document_frequency: 5 };
        assert!(far.boost() > close.boost());
    }

    #[test]
    fn test_expand_bounded_to_ten_candidates() {
        let (_dir, dictionary, stats) = test_env();
        for i in 0..15 {
            let term = format!("cat{i}");
            let mut posting = PostingList::new();
            posting.add(i, 1, None);
            dictionary.merge("books", "title", &term, &posting).unwrap();
            stats.adjust_document_frequency("books", "title", &term, 2).unwrap();
        }

        let typo = TypoTolerance::new(dictionary);
        let candidates = typo.expand("books", Some("title"), "cat1x", &stats).unwrap();
        assert!(candidates.len() <= MAX_CANDIDATES);
    }
}
