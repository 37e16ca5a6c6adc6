// Term index
// Inverted index from normalized term to (segment, frequency) postings,
// with incrementally maintained corpus statistics for BM25 ranking.
// Posting writes happen in the same transaction as the segment row, issued
// explicitly by the segment store code path.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;

use crate::query::{QueryPlan, TermClause};

pub(crate) const BM25_K1: f64 = 1.2;
pub(crate) const BM25_B: f64 = 0.75;

/// One exact-pass candidate. `raw_score` follows the SQLite bm25()
/// convention: negative, and more negative is better.
#[derive(Debug, Clone, Copy)]
pub struct TermHit {
    pub segment_id: i64,
    pub raw_score: f64,
}

/// Add postings for a segment's tokens and bump corpus statistics
pub(crate) fn index_segment(conn: &Connection, segment_id: i64, tokens: &[String]) -> Result<()> {
    let mut frequencies: HashMap<&str, i64> = HashMap::new();
    for token in tokens {
        *frequencies.entry(token.as_str()).or_insert(0) += 1;
    }

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO term_postings (term, segment_id, term_frequency) VALUES (?1, ?2, ?3)
        ON CONFLICT(term, segment_id) DO UPDATE SET term_frequency = excluded.term_frequency
        "#,
    ).context("Failed to prepare term posting insert")?;

    for (term, frequency) in frequencies {
        stmt.execute(params![term, segment_id, frequency])
            .context("Failed to insert term posting")?;
    }

    conn.execute(
        "UPDATE corpus_stats SET total_segments = total_segments + 1, total_tokens = total_tokens + ?1 WHERE id = 1",
        params![tokens.len() as i64],
    ).context("Failed to update corpus statistics")?;

    Ok(())
}

/// Remove all postings for a segment and decrement corpus statistics
pub(crate) fn remove_segment(conn: &Connection, segment_id: i64) -> Result<()> {
    let token_count: i64 = conn.query_row(
        "SELECT COALESCE(SUM(term_frequency), 0) FROM term_postings WHERE segment_id = ?",
        params![segment_id],
        |row| row.get(0),
    ).context("Failed to read segment token count from postings")?;

    let removed = conn.execute(
        "DELETE FROM term_postings WHERE segment_id = ?",
        params![segment_id],
    ).context("Failed to delete term postings")?;

    if removed > 0 {
        conn.execute(
            "UPDATE corpus_stats SET total_segments = MAX(total_segments - 1, 0), total_tokens = MAX(total_tokens - ?1, 0) WHERE id = 1",
            params![token_count],
        ).context("Failed to update corpus statistics")?;
    }

    Ok(())
}

/// Evaluate a planned boolean query: AND across groups, OR within each
/// group. Returns up to `limit` hits ordered best first (raw score
/// ascending).
pub(crate) fn search(conn: &Connection, plan: &QueryPlan, limit: usize) -> Result<Vec<TermHit>> {
    if plan.groups.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let (total_segments, total_tokens): (i64, i64) = conn.query_row(
        "SELECT total_segments, total_tokens FROM corpus_stats WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    ).context("Failed to read corpus statistics")?;

    if total_segments == 0 {
        return Ok(Vec::new());
    }
    let avg_segment_len = total_tokens as f64 / total_segments as f64;

    // Per group: segment id -> best single-term BM25 contribution. Taking
    // the best variant, not the sum, keeps typo expansion from inflating a
    // word's weight.
    let mut group_scores: Vec<HashMap<i64, f64>> = Vec::with_capacity(plan.groups.len());
    for group in &plan.groups {
        let postings = fetch_group_postings(conn, group)?;

        let mut doc_frequency: HashMap<&str, i64> = HashMap::new();
        for posting in &postings {
            *doc_frequency.entry(posting.term.as_str()).or_insert(0) += 1;
        }

        let mut best: HashMap<i64, f64> = HashMap::new();
        for posting in &postings {
            let df = doc_frequency[posting.term.as_str()] as f64;
            let idf = (((total_segments as f64 - df + 0.5) / (df + 0.5)) + 1.0).ln();
            let tf = posting.term_frequency as f64;
            let length_norm =
                1.0 - BM25_B + BM25_B * posting.segment_len as f64 / avg_segment_len;
            let score = idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * length_norm);

            let entry = best.entry(posting.segment_id).or_insert(0.0);
            if score > *entry {
                *entry = score;
            }
        }

        // AND semantics: one empty group empties the whole result
        if best.is_empty() {
            return Ok(Vec::new());
        }
        group_scores.push(best);
    }

    let Some((first, rest)) = group_scores.split_first() else {
        return Ok(Vec::new());
    };
    let mut hits: Vec<TermHit> = first
        .iter()
        .filter(|(segment_id, _)| rest.iter().all(|g| g.contains_key(segment_id)))
        .map(|(segment_id, score)| {
            let total: f64 = score + rest.iter().map(|g| g[segment_id]).sum::<f64>();
            TermHit {
                segment_id: *segment_id,
                raw_score: -total,
            }
        })
        .collect();

    hits.sort_by(|a, b| a.raw_score.total_cmp(&b.raw_score).then(a.segment_id.cmp(&b.segment_id)));
    hits.truncate(limit);
    Ok(hits)
}

struct Posting {
    term: String,
    segment_id: i64,
    term_frequency: i64,
    segment_len: i64,
}

/// Fetch every posting matched by any clause of one OR group
fn fetch_group_postings(conn: &Connection, group: &[TermClause]) -> Result<Vec<Posting>> {
    if group.is_empty() {
        return Ok(Vec::new());
    }

    let mut conditions: Vec<String> = Vec::with_capacity(group.len());
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(group.len());
    for (i, clause) in group.iter().enumerate() {
        if clause.prefix {
            // Terms are normalized to letters only, so the pattern needs
            // no escaping
            conditions.push(format!("tp.term LIKE ?{}", i + 1));
            params_vec.push(Box::new(format!("{}%", clause.text)));
        } else {
            conditions.push(format!("tp.term = ?{}", i + 1));
            params_vec.push(Box::new(clause.text.clone()));
        }
    }

    let sql = format!(
        r#"
        SELECT tp.term, tp.segment_id, tp.term_frequency, s.token_count
        FROM term_postings tp
        JOIN segments s ON s.id = tp.segment_id
        WHERE {}
        "#,
        conditions.join(" OR ")
    );

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql).context("Failed to prepare term search query")?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(Posting {
            term: row.get(0)?,
            segment_id: row.get(1)?,
            term_frequency: row.get(2)?,
            segment_len: row.get(3)?,
        })
    }).context("Failed to execute term search query")?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect term postings")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query;
    use crate::text::normalize;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        crate::database::migrations::run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO recordings (id, title, created_at) VALUES ('r1', 'Test', '2026-01-01T00:00:00+00:00')",
            [],
        ).unwrap();
        conn
    }

    fn add_segment(conn: &Connection, index: i64, text: &str) -> i64 {
        let tokens = normalize(text);
        conn.execute(
            "INSERT INTO segments (recording_id, segment_index, start_time, end_time, text, confidence, token_count, soundex_code)
             VALUES ('r1', ?1, 0.0, 1.0, ?2, 1.0, ?3, '')",
            params![index, text, tokens.len() as i64],
        ).unwrap();
        let id = conn.last_insert_rowid();
        index_segment(conn, id, &tokens).unwrap();
        id
    }

    #[test]
    fn test_index_and_search_single_word() {
        let conn = setup();
        let id = add_segment(&conn, 0, "guitar practice session");
        add_segment(&conn, 1, "completely unrelated words");

        let plan = query::plan("guitar").unwrap();
        let hits = search(&conn, &plan, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].segment_id, id);
        assert!(hits[0].raw_score < 0.0);
    }

    #[test]
    fn test_and_semantics_across_words() {
        let conn = setup();
        add_segment(&conn, 0, "guitar practice");
        add_segment(&conn, 1, "guitar lesson");

        let plan = query::plan("guitar practice").unwrap();
        let hits = search(&conn, &plan, 10).unwrap();
        assert_eq!(hits.len(), 1);

        let plan = query::plan("guitar missing").unwrap();
        assert!(search(&conn, &plan, 10).unwrap().is_empty());
    }

    #[test]
    fn test_prefix_matching() {
        let conn = setup();
        let id = add_segment(&conn, 0, "chemistry notes");

        let plan = query::plan("chem").unwrap();
        let hits = search(&conn, &plan, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].segment_id, id);
    }

    #[test]
    fn test_rarer_term_ranks_higher() {
        let conn = setup();
        // "piano" appears in one segment, "the" in all three
        let rare = add_segment(&conn, 0, "the piano solo");
        add_segment(&conn, 1, "the meeting agenda");
        add_segment(&conn, 2, "the weekly review");

        let plan = query::plan("piano").unwrap();
        let hits = search(&conn, &plan, 10).unwrap();
        assert_eq!(hits[0].segment_id, rare);

        let common = query::plan("the").unwrap();
        let rare_plan = query::plan("piano").unwrap();
        let common_hits = search(&conn, &common, 10).unwrap();
        let rare_hits = search(&conn, &rare_plan, 10).unwrap();
        // More negative raw score = better; the rare term scores better
        assert!(rare_hits[0].raw_score < common_hits[0].raw_score);
    }

    #[test]
    fn test_remove_segment_clears_postings_and_stats() {
        let conn = setup();
        let id = add_segment(&conn, 0, "guitar practice session");

        remove_segment(&conn, id).unwrap();

        let postings: i64 = conn
            .query_row("SELECT COUNT(*) FROM term_postings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(postings, 0);

        let (segments, tokens): (i64, i64) = conn
            .query_row(
                "SELECT total_segments, total_tokens FROM corpus_stats WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(segments, 0);
        assert_eq!(tokens, 0);

        let plan = query::plan("guitar").unwrap();
        assert!(search(&conn, &plan, 10).unwrap().is_empty());
    }

    #[test]
    fn test_reindex_same_segment_does_not_duplicate() {
        let conn = setup();
        let id = add_segment(&conn, 0, "repeat repeat words");
        // Re-running the posting insert upserts instead of duplicating
        index_segment(&conn, id, &normalize("repeat repeat words")).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM term_postings WHERE segment_id = ?",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2); // "repeat", "words"

        let tf: i64 = conn
            .query_row(
                "SELECT term_frequency FROM term_postings WHERE segment_id = ? AND term = 'repeat'",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tf, 2);
    }
}
