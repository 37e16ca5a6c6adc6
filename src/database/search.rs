// Search across the transcript index
// Runs the exact BM25 pass, falls back to the trigram pass when recall is
// thin, fuses both into one composite score, and keeps the best segment
// per recording

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use uuid::Uuid;

use super::models::SearchResult;
use super::{parse_timestamp, parse_uuid, term_index, trigram_index, DatabaseManager};
use crate::query::{self, QueryPlan};
use crate::text;

/// Words of context around the first matched word in a snippet
const SNIPPET_CONTEXT_WORDS: usize = 15;

const MARK_OPEN: &str = "<mark>";
const MARK_CLOSE: &str = "</mark>";

/// Ranking weights. The numeric defaults are deliberately kept as-is:
/// they are tuned values, and changing them changes result order visibly.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    /// Base of the exact-score normalization `max(0, base + raw * slope)`
    pub exact_base: f64,
    /// Slope of the exact-score normalization
    pub exact_slope: f64,
    /// Composite points per matched query trigram
    pub fuzzy_per_match: f64,
    /// Boost for recordings created within the last day
    pub recency_day_boost: f64,
    /// Boost for recordings created within the last week
    pub recency_week_boost: f64,
    /// Boost for recordings created within the last month
    pub recency_month_boost: f64,
    /// Ceiling of the damped per-recording occurrence boost
    pub occurrence_cap: f64,
    /// Scale of the damped occurrence boost `min(cap, ln(n + 1) * scale)`
    pub occurrence_scale: f64,
    /// Minimum share of query trigrams a fuzzy candidate must match
    pub min_trigram_overlap: f64,
    /// The fuzzy pass runs only when the exact pass found fewer results
    pub fuzzy_trigger: usize,
    /// Exact-pass over-fetch multiplier, headroom for dedupe and re-ranking
    pub overfetch: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            exact_base: 100.0,
            exact_slope: 4.0,
            fuzzy_per_match: 10.0,
            recency_day_boost: 30.0,
            recency_week_boost: 20.0,
            recency_month_boost: 10.0,
            occurrence_cap: 15.0,
            occurrence_scale: 5.0,
            min_trigram_overlap: 0.3,
            fuzzy_trigger: 5,
            overfetch: 2,
        }
    }
}

impl DatabaseManager {
    /// Search indexed segments, returning at most `limit` results, one per
    /// recording, best first. Empty and unmatchable queries yield an empty
    /// list, never an error.
    pub fn search_segments(
        &self,
        query: &str,
        limit: usize,
        config: &RankingConfig,
    ) -> Result<Vec<SearchResult>> {
        self.with_connection(|conn| {
            search_segments_impl(conn, query, limit, config)
        })
    }
}

struct Candidate {
    exact_raw: Option<f64>,
    fuzzy_matches: Option<i64>,
}

struct CandidateDetail {
    recording_id: Uuid,
    recording_title: String,
    recording_created_at: DateTime<Utc>,
    start_time: f64,
    end_time: f64,
    text: String,
}

fn search_segments_impl(
    conn: &Connection,
    raw_query: &str,
    limit: usize,
    config: &RankingConfig,
) -> Result<Vec<SearchResult>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let plan = match query::plan(raw_query) {
        Some(plan) => plan,
        None => return Ok(Vec::new()),
    };

    let exact_hits = term_index::search(conn, &plan, limit * config.overfetch)?;

    // Fuzzy pass only when the exact pass came up short, over trigrams of
    // the raw (unexpanded) query
    let mut fuzzy_hits = Vec::new();
    if exact_hits.len() < config.fuzzy_trigger {
        let remaining = limit.saturating_sub(exact_hits.len());
        if remaining > 0 {
            let query_trigrams = text::trigrams(raw_query);
            fuzzy_hits =
                trigram_index::search(conn, &query_trigrams, config.min_trigram_overlap, remaining)?;
        }
    }

    // Union both passes; the exact pass ran first and wins on overlap
    let mut order: Vec<i64> = Vec::with_capacity(exact_hits.len() + fuzzy_hits.len());
    let mut candidates: HashMap<i64, Candidate> = HashMap::new();
    for hit in &exact_hits {
        candidates.insert(hit.segment_id, Candidate {
            exact_raw: Some(hit.raw_score),
            fuzzy_matches: None,
        });
        order.push(hit.segment_id);
    }
    for hit in &fuzzy_hits {
        if !candidates.contains_key(&hit.segment_id) {
            candidates.insert(hit.segment_id, Candidate {
                exact_raw: None,
                fuzzy_matches: Some(hit.match_count),
            });
            order.push(hit.segment_id);
        }
    }

    if order.is_empty() {
        return Ok(Vec::new());
    }

    let details = fetch_candidate_details(conn, &order)?;

    // Exact-pass occurrence counts per recording
    let mut exact_per_recording: HashMap<Uuid, i64> = HashMap::new();
    for hit in &exact_hits {
        if let Some(detail) = details.get(&hit.segment_id) {
            *exact_per_recording.entry(detail.recording_id).or_insert(0) += 1;
        }
    }

    let now = Utc::now();
    let mut scored: Vec<SearchResult> = Vec::with_capacity(order.len());
    for segment_id in order {
        let candidate = &candidates[&segment_id];
        let detail = match details.get(&segment_id) {
            Some(detail) => detail,
            None => continue,
        };

        let exact_score = candidate
            .exact_raw
            .map(|raw| (config.exact_base + raw * config.exact_slope).max(0.0))
            .unwrap_or(0.0);
        let fuzzy_score = candidate
            .fuzzy_matches
            .map(|matches| matches as f64 * config.fuzzy_per_match)
            .unwrap_or(0.0);
        let recency_boost = recency_boost(config, now, detail.recording_created_at);

        let occurrence_count = if candidate.exact_raw.is_some() {
            exact_per_recording.get(&detail.recording_id).copied().unwrap_or(1)
        } else {
            candidate.fuzzy_matches.unwrap_or(0)
        };
        let occurrence_boost = (config.occurrence_scale * ((occurrence_count as f64) + 1.0).ln())
            .min(config.occurrence_cap);

        let snippet = if candidate.exact_raw.is_some() {
            build_snippet(&detail.text, &plan)
        } else {
            // No reliable match offsets on the fuzzy path
            detail.text.clone()
        };

        scored.push(SearchResult {
            segment_id,
            recording_id: detail.recording_id,
            recording_title: detail.recording_title.clone(),
            start_time: detail.start_time,
            end_time: detail.end_time,
            segment_text: detail.text.clone(),
            snippet,
            relevance_score: exact_score + fuzzy_score + recency_boost + occurrence_boost,
            occurrence_count,
            recording_created_at: detail.recording_created_at,
        });
    }

    // One result per recording: keep its best-scoring segment
    let mut best: HashMap<Uuid, SearchResult> = HashMap::new();
    for result in scored {
        match best.get(&result.recording_id) {
            Some(current) if current.relevance_score >= result.relevance_score => {}
            _ => {
                best.insert(result.recording_id, result);
            }
        }
    }

    let mut results: Vec<SearchResult> = best.into_values().collect();
    results.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then(a.segment_id.cmp(&b.segment_id))
    });
    results.truncate(limit);
    Ok(results)
}

fn recency_boost(config: &RankingConfig, now: DateTime<Utc>, created_at: DateTime<Utc>) -> f64 {
    let age = now.signed_duration_since(created_at);
    if age < Duration::days(1) {
        config.recency_day_boost
    } else if age < Duration::days(7) {
        config.recency_week_boost
    } else if age < Duration::days(30) {
        config.recency_month_boost
    } else {
        0.0
    }
}

fn fetch_candidate_details(
    conn: &Connection,
    segment_ids: &[i64],
) -> Result<HashMap<i64, CandidateDetail>> {
    let placeholders: Vec<String> = (1..=segment_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        r#"
        SELECT s.id, s.recording_id, s.start_time, s.end_time, s.text, r.title, r.created_at
        FROM segments s
        INNER JOIN recordings r ON r.id = s.recording_id
        WHERE s.id IN ({})
        "#,
        placeholders.join(", ")
    );

    let params_vec: Vec<Box<dyn rusqlite::ToSql>> = segment_ids
        .iter()
        .map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>)
        .collect();
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql).context("Failed to prepare candidate detail query")?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    }).context("Failed to execute candidate detail query")?;

    let mut details = HashMap::new();
    for row in rows {
        let (id, recording_id, start_time, end_time, text, title, created_at) =
            row.context("Failed to read candidate detail")?;
        details.insert(id, CandidateDetail {
            recording_id: parse_uuid(&recording_id)?,
            recording_title: title,
            recording_created_at: parse_timestamp(&created_at)?,
            start_time,
            end_time,
            text,
        });
    }
    Ok(details)
}

/// Excerpt of ~15 words around the first matched word, matched words
/// wrapped in mark tags. Falls back to the whole text when no word matches
/// the plan (possible when the hit came from a typo variant).
fn build_snippet(text: &str, plan: &QueryPlan) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let matched: Vec<bool> = words.iter().map(|w| word_matches(w, plan)).collect();

    let first = match matched.iter().position(|m| *m) {
        Some(first) => first,
        None => return text.to_string(),
    };

    let start = first.saturating_sub(SNIPPET_CONTEXT_WORDS / 2);
    let end = (start + SNIPPET_CONTEXT_WORDS).min(words.len());

    let mut parts: Vec<String> = Vec::with_capacity(end - start + 2);
    if start > 0 {
        parts.push("...".to_string());
    }
    for i in start..end {
        if matched[i] {
            parts.push(format!("{}{}{}", MARK_OPEN, words[i], MARK_CLOSE));
        } else {
            parts.push(words[i].to_string());
        }
    }
    if end < words.len() {
        parts.push("...".to_string());
    }
    parts.join(" ")
}

fn word_matches(word: &str, plan: &QueryPlan) -> bool {
    let normalized: String = word
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect();
    if normalized.is_empty() {
        return false;
    }
    plan.groups.iter().flatten().any(|clause| {
        if clause.prefix {
            normalized.starts_with(&clause.text)
        } else {
            normalized == clause.text
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{RecordingMeta, SegmentInput};
    use crate::database::{recordings_repo, segments_repo};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        crate::database::migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn add_recording(conn: &Connection, title: &str, created_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        recordings_repo::upsert_recording_impl(conn, &RecordingMeta {
            id,
            title: title.to_string(),
            created_at,
        }).unwrap();
        id
    }

    fn add_segment(conn: &Connection, recording_id: &Uuid, index: i64, text: &str) {
        segments_repo::upsert_and_index_segment(
            conn,
            recording_id,
            index,
            &SegmentInput::new(text, index as f64, index as f64 + 1.0),
        ).unwrap().unwrap();
    }

    #[test]
    fn test_round_trip() {
        let conn = setup();
        let rec = add_recording(&conn, "Music", Utc::now());
        add_segment(&conn, &rec, 0, "guitar practice session");

        let results =
            search_segments_impl(&conn, "guitar", 50, &RankingConfig::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].recording_id, rec);
        assert_eq!(results[0].segment_text, "guitar practice session");
        assert!(results[0].relevance_score > 0.0);
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let conn = setup();
        let rec = add_recording(&conn, "Music", Utc::now());
        add_segment(&conn, &rec, 0, "guitar practice session");

        let config = RankingConfig::default();
        assert!(search_segments_impl(&conn, "", 50, &config).unwrap().is_empty());
        assert!(search_segments_impl(&conn, "   ", 50, &config).unwrap().is_empty());
    }

    #[test]
    fn test_no_match_returns_empty_not_error() {
        let conn = setup();
        let rec = add_recording(&conn, "Music", Utc::now());
        add_segment(&conn, &rec, 0, "guitar practice session");

        let results =
            search_segments_impl(&conn, "zzzzqqqq", 50, &RankingConfig::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_typo_finds_segment_via_fuzzy_path() {
        let conn = setup();
        let rec = add_recording(&conn, "School", Utc::now());
        add_segment(&conn, &rec, 0, "chemistry lecture notes");

        // One deleted character; too mangled for the literal term but well
        // within trigram overlap
        let results =
            search_segments_impl(&conn, "chemstry", 50, &RankingConfig::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].recording_id, rec);
    }

    #[test]
    fn test_dedupe_keeps_best_segment_per_recording() {
        let conn = setup();
        let rec = add_recording(&conn, "Practice log", Utc::now());
        for i in 0..5 {
            add_segment(&conn, &rec, i, "guitar warmup exercise");
        }

        let results =
            search_segments_impl(&conn, "guitar", 50, &RankingConfig::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].occurrence_count, 5);
    }

    #[test]
    fn test_recency_breaks_ties() {
        let conn = setup();
        let old = add_recording(&conn, "Old", Utc::now() - Duration::days(40));
        let new = add_recording(&conn, "New", Utc::now());
        add_segment(&conn, &old, 0, "guitar practice session");
        add_segment(&conn, &new, 0, "guitar practice session");

        let results =
            search_segments_impl(&conn, "guitar", 50, &RankingConfig::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].recording_id, new);
        assert_eq!(results[1].recording_id, old);
        assert!(results[0].relevance_score > results[1].relevance_score);
    }

    #[test]
    fn test_snippet_marks_matched_words() {
        let conn = setup();
        let rec = add_recording(&conn, "Music", Utc::now());
        add_segment(&conn, &rec, 0, "Today we did a long guitar practice before dinner");

        let results =
            search_segments_impl(&conn, "guitar", 50, &RankingConfig::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].snippet.contains("<mark>guitar</mark>"));
        assert_eq!(results[0].segment_text, "Today we did a long guitar practice before dinner");
    }

    #[test]
    fn test_snippet_windows_long_text() {
        let conn = setup();
        let rec = add_recording(&conn, "Long", Utc::now());
        let mut words: Vec<String> = (0..40).map(|i| format!("filler{:02}", i)).collect();
        words[30] = "guitar".to_string();
        add_segment(&conn, &rec, 0, &words.join(" "));

        let results =
            search_segments_impl(&conn, "guitar", 50, &RankingConfig::default()).unwrap();
        let snippet = &results[0].snippet;
        assert!(snippet.starts_with("..."));
        assert!(snippet.contains("<mark>guitar</mark>"));
        // Window, not the whole text
        assert!(snippet.split_whitespace().count() < 20);
        assert!(!snippet.contains("filler00"));
    }

    #[test]
    fn test_fuzzy_only_hit_keeps_raw_text_as_snippet() {
        let conn = setup();
        let rec = add_recording(&conn, "School", Utc::now());
        add_segment(&conn, &rec, 0, "chemistry lecture notes");

        let results =
            search_segments_impl(&conn, "chemstry", 50, &RankingConfig::default()).unwrap();
        assert_eq!(results[0].snippet, "chemistry lecture notes");
        assert!(!results[0].snippet.contains(MARK_OPEN));
    }

    #[test]
    fn test_limit_truncates() {
        let conn = setup();
        for i in 0..8 {
            let rec = add_recording(&conn, &format!("Rec {}", i), Utc::now());
            add_segment(&conn, &rec, 0, "guitar practice session");
        }

        let results =
            search_segments_impl(&conn, "guitar", 3, &RankingConfig::default()).unwrap();
        assert_eq!(results.len(), 3);
    }
}
