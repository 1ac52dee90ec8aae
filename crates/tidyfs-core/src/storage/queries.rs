use super::models::*;
use super::sqlite::Database;
use crate::scanner::TermVector;
use ahash::AHashMap;
use rusqlite::{params, OptionalExtension, Result, Transaction};
use tracing::debug;

impl Database {
    // ── Paths ────────────────────────────────────────────────────

    /// Insert or refresh `path` and replace all of its term relationships with `terms`.
    ///
    /// Full replace: terms absent from `terms` lose their relationship to the path, and
    /// dictionary entries left without any relationship are dropped.
    pub fn upsert_path_terms(&self, path: &str, terms: &TermVector) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self.connection().unchecked_transaction()?;
        let path_id: i64 = tx.query_row(
            "INSERT INTO paths (absolute_path, last_scraped) VALUES (?1, ?2) \
             ON CONFLICT(absolute_path) DO UPDATE SET last_scraped = excluded.last_scraped \
             RETURNING id",
            params![path, now],
            |row| row.get(0),
        )?;

        let previous_terms = term_ids_for_path(&tx, path_id)?;
        tx.execute(
            "DELETE FROM relationships WHERE path_id = ?1",
            params![path_id],
        )?;

        {
            let mut term_stmt = tx.prepare_cached(
                "INSERT INTO terms (word) VALUES (?1) \
                 ON CONFLICT(word) DO UPDATE SET word = excluded.word \
                 RETURNING id",
            )?;
            let mut rel_stmt = tx.prepare_cached(
                "INSERT INTO relationships (path_id, term_id, frequency) VALUES (?1, ?2, ?3)",
            )?;
            for (word, frequency) in terms {
                if *frequency == 0 {
                    continue;
                }
                let term_id: i64 = term_stmt.query_row(params![word], |row| row.get(0))?;
                rel_stmt.execute(params![path_id, term_id, *frequency as i64])?;
            }
        }

        let dropped = delete_orphan_terms(&tx, &previous_terms)?;
        tx.commit()?;
        debug!(
            "Upserted {} with {} terms ({} orphaned terms dropped)",
            path,
            terms.len(),
            dropped
        );
        Ok(path_id)
    }

    /// Delete `path` and its relationships. Terms exclusive to it leave the dictionary.
    pub fn remove_path(&self, path: &str) -> Result<bool> {
        let tx = self.connection().unchecked_transaction()?;
        let removed = remove_path_in(&tx, path)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Delete `path` and every indexed path beneath it. Returns the removed paths.
    pub fn remove_subtree(&self, path: &str) -> Result<Vec<String>> {
        let root = path.trim_end_matches(std::path::MAIN_SEPARATOR);
        let prefix = format!("{}{}", root, std::path::MAIN_SEPARATOR);
        let tx = self.connection().unchecked_transaction()?;
        let victims: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT absolute_path FROM paths \
                 WHERE absolute_path = ?1 OR substr(absolute_path, 1, length(?2)) = ?2 \
                 ORDER BY absolute_path",
            )?;
            let rows = stmt
                .query_map(params![root, prefix], |row| row.get(0))?
                .collect::<Result<Vec<String>>>()?;
            rows
        };
        for victim in &victims {
            remove_path_in(&tx, victim)?;
        }
        tx.commit()?;
        if !victims.is_empty() {
            debug!("Invalidated {} indexed paths under {}", victims.len(), root);
        }
        Ok(victims)
    }

    pub fn get_path(&self, path: &str) -> Result<Option<IndexedPath>> {
        self.connection()
            .query_row(
                "SELECT id, absolute_path, last_scraped FROM paths WHERE absolute_path = ?1",
                params![path],
                |row| {
                    Ok(IndexedPath {
                        id: row.get(0)?,
                        absolute_path: row.get(1)?,
                        last_scraped: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn all_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT absolute_path FROM paths ORDER BY absolute_path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(paths)
    }

    pub fn path_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM paths", [], |row| row.get(0))
    }

    // ── Terms ────────────────────────────────────────────────────

    pub fn get_term(&self, word: &str) -> Result<Option<Term>> {
        self.connection()
            .query_row(
                "SELECT id, word FROM terms WHERE word = ?1",
                params![word],
                |row| {
                    Ok(Term {
                        id: row.get(0)?,
                        word: row.get(1)?,
                    })
                },
            )
            .optional()
    }

    pub fn term_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM terms", [], |row| row.get(0))
    }

    pub fn relationships_for(&self, path: &str) -> Result<Vec<TermRelationship>> {
        let mut stmt = self.connection().prepare(
            "SELECT r.id, r.path_id, r.term_id, r.frequency \
             FROM relationships r JOIN paths p ON p.id = r.path_id \
             WHERE p.absolute_path = ?1 ORDER BY r.term_id",
        )?;
        let rels = stmt
            .query_map(params![path], |row| {
                Ok(TermRelationship {
                    id: row.get(0)?,
                    path_id: row.get(1)?,
                    term_id: row.get(2)?,
                    frequency: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rels)
    }

    // ── Inverted index ───────────────────────────────────────────

    pub fn terms_for(&self, path: &str) -> Result<TermVector> {
        let mut stmt = self.connection().prepare(
            "SELECT t.word, r.frequency \
             FROM relationships r \
             JOIN paths p ON p.id = r.path_id \
             JOIN terms t ON t.id = r.term_id \
             WHERE p.absolute_path = ?1",
        )?;
        let rows = stmt.query_map(params![path], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut vector = TermVector::new();
        for row in rows {
            let (word, frequency) = row?;
            vector.insert(word, frequency as u64);
        }
        Ok(vector)
    }

    /// Paths containing `word`, with its frequency in each, ordered by path.
    pub fn paths_for(&self, word: &str) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.connection().prepare(
            "SELECT p.absolute_path, r.frequency \
             FROM relationships r \
             JOIN paths p ON p.id = r.path_id \
             JOIN terms t ON t.id = r.term_id \
             WHERE t.word = ?1 ORDER BY p.absolute_path",
        )?;
        let paths = stmt
            .query_map(params![word], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(paths)
    }

    /// Every indexed path with its term-id → frequency map, for the similarity pass.
    pub fn load_term_vectors(&self) -> Result<Vec<(String, AHashMap<i64, u64>)>> {
        let mut stmt = self.connection().prepare(
            "SELECT p.id, p.absolute_path, r.term_id, r.frequency \
             FROM paths p LEFT JOIN relationships r ON r.path_id = p.id \
             ORDER BY p.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut vectors: Vec<(String, AHashMap<i64, u64>)> = Vec::new();
        let mut current_id: Option<i64> = None;
        for row in rows {
            let (path_id, path, term_id, frequency) = row?;
            if current_id != Some(path_id) {
                vectors.push((path, AHashMap::new()));
                current_id = Some(path_id);
            }
            if let (Some(term_id), Some(frequency), Some((_, vector))) =
                (term_id, frequency, vectors.last_mut())
            {
                vector.insert(term_id, frequency as u64);
            }
        }
        Ok(vectors)
    }
}

fn term_ids_for_path(tx: &Transaction, path_id: i64) -> Result<Vec<i64>> {
    let mut stmt = tx.prepare_cached("SELECT term_id FROM relationships WHERE path_id = ?1")?;
    let ids = stmt
        .query_map(params![path_id], |row| row.get(0))?
        .collect::<Result<Vec<_>>>()?;
    Ok(ids)
}

/// Drop the given terms if nothing references them any more.
fn delete_orphan_terms(tx: &Transaction, term_ids: &[i64]) -> Result<usize> {
    let mut stmt = tx.prepare_cached(
        "DELETE FROM terms WHERE id = ?1 \
         AND NOT EXISTS (SELECT 1 FROM relationships WHERE term_id = ?1)",
    )?;
    let mut dropped = 0;
    for term_id in term_ids {
        dropped += stmt.execute(params![term_id])?;
    }
    Ok(dropped)
}

fn remove_path_in(tx: &Transaction, path: &str) -> Result<bool> {
    let path_id: Option<i64> = tx
        .query_row(
            "SELECT id FROM paths WHERE absolute_path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()?;
    let Some(path_id) = path_id else {
        return Ok(false);
    };

    let term_ids = term_ids_for_path(tx, path_id)?;
    tx.execute(
        "DELETE FROM relationships WHERE path_id = ?1",
        params![path_id],
    )?;
    tx.execute("DELETE FROM paths WHERE id = ?1", params![path_id])?;
    let dropped = delete_orphan_terms(tx, &term_ids)?;
    debug!("Removed {} from index ({} orphaned terms dropped)", path, dropped);
    Ok(true)
}
