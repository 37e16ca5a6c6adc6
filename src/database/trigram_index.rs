// Trigram index
// Presence-only inverted index from character trigram to segment, used for
// fuzzy matching when the exact pass comes up short. Maintained in the
// same transaction as the segment row.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

/// One fuzzy-pass candidate with its query-trigram overlap count
#[derive(Debug, Clone, Copy)]
pub struct TrigramHit {
    pub segment_id: i64,
    pub match_count: i64,
}

/// Add presence postings for a segment's deduplicated trigram set
pub(crate) fn index_segment(
    conn: &Connection,
    segment_id: i64,
    trigrams: &BTreeSet<String>,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO trigram_postings (trigram, segment_id) VALUES (?1, ?2)",
    ).context("Failed to prepare trigram posting insert")?;

    for trigram in trigrams {
        stmt.execute(params![trigram, segment_id])
            .context("Failed to insert trigram posting")?;
    }

    Ok(())
}

/// Remove all trigram postings for a segment
pub(crate) fn remove_segment(conn: &Connection, segment_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM trigram_postings WHERE segment_id = ?",
        params![segment_id],
    ).context("Failed to delete trigram postings")?;

    Ok(())
}

/// Find segments sharing trigrams with the query. A candidate is kept when
/// its overlap count reaches `ceil(|query| * min_overlap_ratio)`, with a
/// floor of 1; results are ordered by overlap count descending.
pub(crate) fn search(
    conn: &Connection,
    query_trigrams: &BTreeSet<String>,
    min_overlap_ratio: f64,
    limit: usize,
) -> Result<Vec<TrigramHit>> {
    if query_trigrams.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let required = ((query_trigrams.len() as f64 * min_overlap_ratio).ceil() as i64).max(1);

    let placeholders: Vec<String> = (1..=query_trigrams.len())
        .map(|i| format!("?{}", i))
        .collect();
    let sql = format!(
        r#"
        SELECT segment_id, COUNT(*) AS matches
        FROM trigram_postings
        WHERE trigram IN ({})
        GROUP BY segment_id
        HAVING COUNT(*) >= ?{}
        ORDER BY matches DESC, segment_id ASC
        LIMIT ?{}
        "#,
        placeholders.join(", "),
        query_trigrams.len() + 1,
        query_trigrams.len() + 2,
    );

    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = query_trigrams
        .iter()
        .map(|t| Box::new(t.clone()) as Box<dyn rusqlite::ToSql>)
        .collect();
    params_vec.push(Box::new(required));
    params_vec.push(Box::new(limit as i64));

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql).context("Failed to prepare trigram search query")?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(TrigramHit {
            segment_id: row.get(0)?,
            match_count: row.get(1)?,
        })
    }).context("Failed to execute trigram search query")?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect trigram hits")
}
