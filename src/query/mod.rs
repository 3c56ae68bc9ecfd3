//! Query parsing and evaluation: turns a query tree into a scored, paginated,
//! hydrated set of hits.
//!
//! Clauses are evaluated as candidate-intersection-then-verification for
//! `bool.must`, with typo expansion feeding in as extra `should` clauses. The
//! evaluator moves each query through a fixed
//! `Parsed -> Analyzed -> PostingsFetched -> Scored -> Paginated -> Hydrated`
//! pipeline of match-based transitions.

use crate::analysis::AnalyzerRegistry;
use crate::dictionary::TermDictionary;
use crate::error::{Result, SearchError};
use crate::index_service::{IndexMeta, IndexService};
use crate::postings::DocId;
use crate::scoring::{BM25Scorer, TermStat};
use crate::stats::IndexStats;
use crate::typo::TypoTolerance;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// A parsed query leaf or combinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll {
        boost: f32,
    },
    Match {
        field: Option<String>,
        value: String,
        boost: f32,
    },
    Term {
        field: String,
        value: String,
        boost: f32,
    },
    Wildcard {
        field: String,
        value: String,
        boost: f32,
    },
    Bool {
        must: Vec<Query>,
        should: Vec<Query>,
        must_not: Vec<Query>,
    },
}

const ALL_FIELD: &str = "_all";

impl Query {
    /// Parse a transport-agnostic JSON query tree. Unknown shapes fail with
    /// `BadQuery` rather than silently matching nothing.
    pub fn from_json(value: &JsonValue) -> Result<Query> {
        let obj = value
            .as_object()
            .ok_or_else(|| SearchError::BadQuery("query must be a JSON object".into()))?;

        if let Some(v) = obj.get("match_all") {
            let boost = read_boost(v)?;
            return Ok(Query::MatchAll { boost });
        }
        if let Some(v) = obj.get("match") {
            let field = v.get("field").and_then(JsonValue::as_str).map(str::to_string);
            let value = read_required_str(v, "value")?;
            let boost = read_boost(v)?;
            return Ok(Query::Match { field, value, boost });
        }
        if let Some(v) = obj.get("term") {
            let field = read_required_str(v, "field")?;
            let value = read_required_str(v, "value")?;
            let boost = read_boost(v)?;
            return Ok(Query::Term { field, value, boost });
        }
        if let Some(v) = obj.get("wildcard") {
            let field = read_required_str(v, "field")?;
            let value = read_required_str(v, "value")?;
            let boost = read_boost(v)?;
            return Ok(Query::Wildcard { field, value, boost });
        }
        if let Some(v) = obj.get("bool") {
            let must = read_clause_list(v, "must")?;
            let should = read_clause_list(v, "should")?;
            let must_not = read_clause_list(v, "must_not")?;
            return Ok(Query::Bool { must, should, must_not });
        }

        Err(SearchError::BadQuery(format!(
            "unknown query shape: expected one of match_all/match/term/wildcard/bool, got keys {:?}",
            obj.keys().collect::<Vec<_>>()
        )))
    }
}

fn read_required_str(v: &JsonValue, key: &str) -> Result<String> {
    v.get(key)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| SearchError::BadQuery(format!("missing or non-string field `{key}`")))
}

fn read_boost(v: &JsonValue) -> Result<f32> {
    match v.get("boost") {
        Some(b) => b
            .as_f64()
            .map(|f| f as f32)
            .ok_or_else(|| SearchError::BadQuery("`boost` must be numeric".into())),
        None => Ok(1.0),
    }
}

fn read_clause_list(v: &JsonValue, key: &str) -> Result<Vec<Query>> {
    match v.get(key) {
        None => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items.iter().map(Query::from_json).collect(),
        Some(_) => Err(SearchError::BadQuery(format!("`{key}` must be an array of queries"))),
    }
}

/// One suggested correction surfaced alongside a search's hits.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub text: String,
    pub edit_distance: u32,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub index: String,
    pub score: f32,
    pub source: JsonValue,
}

#[derive(Debug, Clone)]
pub struct SearchEnvelope {
    pub total: usize,
    pub max_score: f32,
    pub hits: Vec<Hit>,
    pub took_ms: u64,
    pub suggestions: Vec<Suggestion>,
}

/// Per-clause accumulation of matching doc ids and their score contribution.
#[derive(Debug, Default)]
struct ClauseResult {
    scores: HashMap<DocId, f32>,
}

impl ClauseResult {
    fn doc_ids(&self) -> HashSet<DocId> {
        self.scores.keys().copied().collect()
    }
}

/// Per-query evaluation state threaded through the pipeline: precomputed
/// field stats, the deadline, and an accumulator for typo suggestions.
struct EvalContext<'a> {
    index: String,
    meta: &'a IndexMeta,
    searchable_fields: Vec<String>,
    default_analyzer: String,
    stats: &'a IndexStats,
    total_docs: u64,
    field_avg_lengths: HashMap<String, f32>,
    all_doc_ids: Vec<DocId>,
    deadline: Option<Instant>,
    suggestions: RefCell<Vec<Suggestion>>,
}

impl<'a> EvalContext<'a> {
    fn check_deadline(&self) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(SearchError::Cancelled);
            }
        }
        Ok(())
    }

    fn field_boost(&self, field: &str) -> f32 {
        self.meta.mappings.get(field).map(|m| m.boost).unwrap_or(1.0)
    }

    fn field_analyzer_name(&self, field: &str) -> String {
        self.meta
            .mappings
            .get(field)
            .map(|m| m.analyzer.clone())
            .unwrap_or_else(|| self.default_analyzer.clone())
    }

    fn record_suggestion(&self, text: String, edit_distance: u32) {
        let mut suggestions = self.suggestions.borrow_mut();
        if !suggestions.iter().any(|s| s.text == text) {
            suggestions.push(Suggestion { text, edit_distance });
        }
    }
}

/// Evaluates parsed queries against a term dictionary, stats, and document
/// store, producing ranked, paginated, hydrated hits.
pub struct QueryEvaluator {
    dictionary: TermDictionary,
    analyzers: Arc<AnalyzerRegistry>,
    typo: TypoTolerance,
    scorer: BM25Scorer,
    default_analyzer: String,
}

impl QueryEvaluator {
    pub fn new(
        dictionary: TermDictionary,
        analyzers: Arc<AnalyzerRegistry>,
        typo: TypoTolerance,
        scorer: BM25Scorer,
        default_analyzer: String,
    ) -> Self {
        Self { dictionary, analyzers, typo, scorer, default_analyzer }
    }

    /// Run a full search: parse has already happened by the time `query`
    /// reaches here, so this covers Analyzed through Hydrated.
    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &self,
        index_service: &IndexService,
        index: &str,
        query: &Query,
        from: usize,
        size: usize,
        deadline: Option<Instant>,
    ) -> Result<SearchEnvelope> {
        let started = Instant::now();
        let meta = index_service.get_index(index)?;
        let stats = index_service.stats(index)?;
        let total_docs = stats.total_documents().max(0) as u64;

        let searchable_fields: Vec<String> = meta
            .mappings
            .iter()
            .filter(|(_, m)| m.field_type == "text" || m.field_type == "keyword")
            .map(|(name, _)| name.clone())
            .collect();
        let field_avg_lengths = stats.field_averages(index, &searchable_fields)?;
        let all_doc_ids = if query_needs_all_docs(query) {
            index_service.all_doc_ids(index)?
        } else {
            Vec::new()
        };

        let ctx = EvalContext {
            index: index.to_string(),
            meta: &meta,
            searchable_fields,
            default_analyzer: self.default_analyzer.clone(),
            stats: &stats,
            total_docs,
            field_avg_lengths,
            all_doc_ids,
            deadline,
            suggestions: RefCell::new(Vec::new()),
        };

        ctx.check_deadline()?; // Parsed -> Analyzed
        let result = self.eval(&ctx, query)?; // Analyzed -> PostingsFetched -> Scored
        ctx.check_deadline()?; // -> Paginated

        // Resolve the internal numeric doc id back to its external string id
        // up front, so the tie-break below sorts on the real doc_id ordering
        // (lexicographic for string ids) rather than its numeric hash.
        let mut scored: Vec<(String, f32)> = Vec::with_capacity(result.scores.len());
        for (doc_id, score) in result.scores {
            if let Some(string_id) = index_service.resolve_doc_id(index, doc_id)? {
                scored.push((string_id, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        let total = scored.len();
        let max_score = scored.first().map(|(_, s)| *s).unwrap_or(0.0);

        let page: Vec<(String, f32)> = if size == 0 {
            Vec::new()
        } else {
            scored.into_iter().skip(from).take(size).collect()
        };

        ctx.check_deadline()?; // -> Hydrated
        let mut hits = Vec::with_capacity(page.len());
        for (string_id, score) in page {
            let Some(source) = index_service.get_document(index, &string_id)? else {
                continue;
            };
            hits.push(Hit { id: string_id, index: index.to_string(), score, source });
        }

        Ok(SearchEnvelope {
            total,
            max_score,
            hits,
            took_ms: started.elapsed().as_millis() as u64,
            suggestions: ctx.suggestions.into_inner(),
        })
    }

    /// Evaluate a query against the index for its matching doc ids only,
    /// without paginating or hydrating. Used by delete-by-query.
    pub fn matching_doc_ids(&self, index_service: &IndexService, index: &str, query: &Query) -> Result<Vec<DocId>> {
        let meta = index_service.get_index(index)?;
        let stats = index_service.stats(index)?;
        let total_docs = stats.total_documents().max(0) as u64;
        let searchable_fields: Vec<String> = meta
            .mappings
            .iter()
            .filter(|(_, m)| m.field_type == "text" || m.field_type == "keyword")
            .map(|(name, _)| name.clone())
            .collect();
        let field_avg_lengths = stats.field_averages(index, &searchable_fields)?;
        let all_doc_ids = if query_needs_all_docs(query) {
            index_service.all_doc_ids(index)?
        } else {
            Vec::new()
        };

        let ctx = EvalContext {
            index: index.to_string(),
            meta: &meta,
            searchable_fields,
            default_analyzer: self.default_analyzer.clone(),
            stats: &stats,
            total_docs,
            field_avg_lengths,
            all_doc_ids,
            deadline: None,
            suggestions: RefCell::new(Vec::new()),
        };

        let result = self.eval(&ctx, query)?;
        Ok(result.doc_ids().into_iter().collect())
    }

    fn eval(&self, ctx: &EvalContext, query: &Query) -> Result<ClauseResult> {
        ctx.check_deadline()?;
        match query {
            Query::MatchAll { boost } => self.eval_match_all(ctx, *boost),
            Query::Match { field, value, boost } => self.eval_match(ctx, field.as_deref(), value, *boost),
            Query::Term { field, value, boost } => self.eval_term(ctx, field, value, *boost),
            Query::Wildcard { field, value, boost } => self.eval_wildcard(ctx, field, value, *boost),
            Query::Bool { must, should, must_not } => self.eval_bool(ctx, must, should, must_not),
        }
    }

    fn eval_match_all(&self, ctx: &EvalContext, boost: f32) -> Result<ClauseResult> {
        let mut result = ClauseResult::default();
        for &doc_id in &ctx.all_doc_ids {
            result.scores.insert(doc_id, boost);
        }
        Ok(result)
    }

    fn eval_match(&self, ctx: &EvalContext, field: Option<&str>, value: &str, boost: f32) -> Result<ClauseResult> {
        let fields: Vec<String> = match field {
            Some(f) if f != ALL_FIELD => vec![f.to_string()],
            _ => ctx.searchable_fields.clone(),
        };

        let mut result = ClauseResult::default();
        for f in &fields {
            let analyzer_name = ctx.field_analyzer_name(f);
            let analyzer = self.analyzers.get(&analyzer_name)?;
            let tokens = analyzer.analyze(value);
            let field_boost = ctx.field_boost(f);

            for token in &tokens {
                self.accumulate_term(ctx, &mut result, f, &token.text, boost * field_boost)?;

                let candidates = self.typo.expand(&ctx.index, Some(f.as_str()), &token.text, ctx.stats)?;
                for candidate in candidates {
                    self.accumulate_term(
                        ctx,
                        &mut result,
                        &candidate.field,
                        &candidate.term,
                        boost * field_boost * candidate.boost(),
                    )?;
                    ctx.record_suggestion(candidate.term.clone(), candidate.edit_distance);
                }
            }
        }
        Ok(result)
    }

    fn eval_term(&self, ctx: &EvalContext, field: &str, value: &str, boost: f32) -> Result<ClauseResult> {
        let mut result = ClauseResult::default();
        let field_boost = ctx.field_boost(field);
        self.accumulate_term(ctx, &mut result, field, value, boost * field_boost)?;
        Ok(result)
    }

    fn eval_wildcard(&self, ctx: &EvalContext, field: &str, pattern: &str, boost: f32) -> Result<ClauseResult> {
        let fields: Vec<String> = if field == ALL_FIELD { ctx.searchable_fields.clone() } else { vec![field.to_string()] };

        let mut result = ClauseResult::default();
        for f in &fields {
            let field_boost = ctx.field_boost(f);
            for term in self.dictionary.scan_terms(&ctx.index, f)? {
                if glob_match(pattern, &term) {
                    self.accumulate_term(ctx, &mut result, f, &term, boost * field_boost)?;
                }
            }
        }
        Ok(result)
    }

    fn eval_bool(&self, ctx: &EvalContext, must: &[Query], should: &[Query], must_not: &[Query]) -> Result<ClauseResult> {
        let must_results: Vec<ClauseResult> = must.iter().map(|q| self.eval(ctx, q)).collect::<Result<_>>()?;
        let should_results: Vec<ClauseResult> = should.iter().map(|q| self.eval(ctx, q)).collect::<Result<_>>()?;
        let must_not_results: Vec<ClauseResult> = must_not.iter().map(|q| self.eval(ctx, q)).collect::<Result<_>>()?;

        let base: HashSet<DocId> = if !must_results.is_empty() {
            let mut iter = must_results.iter().map(ClauseResult::doc_ids);
            let first = iter.next().unwrap_or_default();
            iter.fold(first, |acc, ids| acc.intersection(&ids).copied().collect())
        } else {
            let mut union = HashSet::new();
            for r in &should_results {
                union.extend(r.doc_ids());
            }
            union
        };

        let mut result = ClauseResult::default();
        for doc_id in base {
            let mut score = 0.0;
            for r in &must_results {
                score += r.scores.get(&doc_id).copied().unwrap_or(0.0);
            }
            for r in &should_results {
                score += r.scores.get(&doc_id).copied().unwrap_or(0.0);
            }
            result.scores.insert(doc_id, score);
        }

        for r in &must_not_results {
            for doc_id in r.doc_ids() {
                result.scores.remove(&doc_id);
            }
        }

        Ok(result)
    }

    /// Look up `term`'s posting list in `field`, score every occurrence
    /// against BM25, and fold the contribution into `result`.
    fn accumulate_term(&self, ctx: &EvalContext, result: &mut ClauseResult, field: &str, term: &str, boost: f32) -> Result<()> {
        let Some(postings) = self.dictionary.get(&ctx.index, field, term)? else {
            return Ok(());
        };
        let df = ctx.stats.document_frequency(&ctx.index, field, term)?;
        if df == 0 {
            return Ok(());
        }
        let avg_len = ctx.field_avg_lengths.get(field).copied().unwrap_or(0.0);

        for entry in postings.iterate() {
            let field_length = ctx
                .stats
                .doc_field_length(&ctx.index, field, entry.doc_id)?
                .unwrap_or_else(|| avg_len.round() as u32);
            let stat = TermStat { document_frequency: df, term_frequency: entry.frequency };
            let score = self.scorer.term_score(ctx.total_docs, &stat, field_length, avg_len, boost);
            *result.scores.entry(entry.doc_id).or_insert(0.0) += score;
        }
        Ok(())
    }

    /// Ranked term suggestions for a prefix, independent of a full search
    /// (the `suggest` operation in §6's request surface).
    pub fn suggest(&self, index_service: &IndexService, index: &str, prefix: &str, field: Option<&str>) -> Result<Vec<(String, u64)>> {
        index_service.get_index(index)?;
        let stats = index_service.stats(index)?;
        let meta = index_service.get_index(index)?;
        let fields: Vec<String> = match field {
            Some(f) => vec![f.to_string()],
            None => meta.mappings.keys().cloned().collect(),
        };

        let mut ranked = Vec::new();
        for f in &fields {
            for term in self.dictionary.scan_terms(index, f)? {
                if term.starts_with(prefix) {
                    let df = stats.document_frequency(index, f, &term)?;
                    if df > 0 {
                        ranked.push((term, df));
                    }
                }
            }
        }
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(10);
        Ok(ranked)
    }
}

fn query_needs_all_docs(query: &Query) -> bool {
    match query {
        Query::MatchAll { .. } => true,
        Query::Bool { must, should, must_not } => {
            must.iter().any(query_needs_all_docs) || should.iter().any(query_needs_all_docs) || must_not.iter().any(query_needs_all_docs)
        }
        _ => false,
    }
}

/// Matches `text` against a `*`/`?` glob `pattern`, anchored at both ends.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star_idx = Some(pi);
            match_idx = ti;
            pi += 1;
        } else if let Some(si) = star_idx {
            pi = si + 1;
            match_idx += 1;
            ti = match_idx;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
