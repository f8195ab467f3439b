use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::database::cache::LookupCache;
use crate::database::{begin_write, get_or_create};
use crate::ingest::hasher::text_hash;
use crate::ingest::records::{Record, StyleMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    /// Filename already present in the database.
    pub existing: usize,
    /// Record had no filename.
    pub skipped: usize,
}

impl ImportSummary {
    pub fn processed(&self) -> usize {
        self.inserted + self.existing + self.skipped
    }

    fn absorb(&mut self, other: ImportSummary) {
        self.inserted += other.inserted;
        self.existing += other.existing;
        self.skipped += other.skipped;
    }
}

/// Buffers scraped records and writes them in one transaction per batch,
/// resolving prompts, styles and titles to shared rows.
pub struct RecordImporter {
    conn: Connection,
    buffer: Vec<Record>,
    buffer_limit: usize,
    cache: LookupCache,
    summary: ImportSummary,
}

impl RecordImporter {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self::from_connection(crate::database::open(path)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            buffer: Vec::new(),
            buffer_limit: 1000,
            cache: LookupCache::new(),
            summary: ImportSummary::default(),
        }
    }

    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit.max(1);
        self
    }

    /// Upserts the style string of every learned style.
    pub fn import_styles(&mut self, styles: &StyleMap) -> Result<usize> {
        let tx = begin_write(&mut self.conn)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO art_styles (name, style_string) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET style_string = excluded.style_string",
            )?;
            for (name, entry) in styles {
                stmt.execute(params![name, entry.style_string])?;
            }
        }
        tx.commit().context("Failed to commit transaction")?;
        Ok(styles.len())
    }

    pub fn add(&mut self, record: Record) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.buffer_limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the buffered records in one transaction. On failure the batch
    /// is rolled back and kept for a retry, and the cache is reset since it
    /// may hold ids of rolled-back rows.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match write_batch(&mut self.conn, &mut self.cache, &self.buffer) {
            Ok(batch) => {
                self.summary.absorb(batch);
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.cache = LookupCache::new();
                Err(e)
            }
        }
    }

    /// Flushes what is left and returns the totals so far.
    pub fn finish(&mut self) -> Result<ImportSummary> {
        self.flush()?;
        Ok(self.summary)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

fn write_batch(
    conn: &mut Connection,
    cache: &mut LookupCache,
    records: &[Record],
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let tx = begin_write(conn)?;
    for record in records {
        if !record.has_filename() {
            summary.skipped += 1;
            continue;
        }
        let inserted = write_record(&tx, cache, record)
            .with_context(|| format!("Failed to import {}", record.filename))?;
        if inserted {
            summary.inserted += 1;
        } else {
            summary.existing += 1;
        }
    }
    tx.commit().context("Failed to commit transaction")?;
    Ok(summary)
}

fn optional_id(
    conn: &Connection,
    cache: &mut std::collections::HashMap<String, i64>,
    text: &str,
    select_sql: &str,
    insert_sql: &str,
) -> rusqlite::Result<Option<i64>> {
    if text.is_empty() {
        return Ok(None);
    }
    let hash = text_hash(text);
    if let Some(&id) = cache.get(&hash) {
        return Ok(Some(id));
    }
    let id = get_or_create(conn, select_sql, &hash, insert_sql, &[&hash, &text])?;
    cache.insert(hash, id);
    Ok(Some(id))
}

/// Writes one record. Returns false when the filename was already imported.
fn write_record(conn: &Connection, cache: &mut LookupCache, record: &Record) -> Result<bool> {
    let positive_id = optional_id(
        conn,
        &mut cache.positive_prompts,
        record.prompt_text(),
        "SELECT id FROM positive_prompts WHERE prompt_hash = ?1",
        "INSERT INTO positive_prompts (prompt_hash, prompt_text) VALUES (?1, ?2)",
    )?;
    let negative_id = optional_id(
        conn,
        &mut cache.negative_prompts,
        &record.negative_prompt,
        "SELECT id FROM negative_prompts WHERE prompt_hash = ?1",
        "INSERT INTO negative_prompts (prompt_hash, prompt_text) VALUES (?1, ?2)",
    )?;
    let title_id = optional_id(
        conn,
        &mut cache.titles,
        &record.title,
        "SELECT id FROM titles WHERE title_hash = ?1",
        "INSERT INTO titles (title_hash, title_text) VALUES (?1, ?2)",
    )?;

    let combination_key = format!(
        "{}:{}",
        positive_id.map_or("-".to_string(), |id| id.to_string()),
        negative_id.map_or("-".to_string(), |id| id.to_string())
    );
    let combination_hash = text_hash(&combination_key);
    let combination_id = match cache.combinations.get(&combination_hash) {
        Some(&id) => id,
        None => {
            let id = get_or_create(
                conn,
                "SELECT id FROM prompt_combinations WHERE combination_hash = ?1",
                &combination_hash,
                "INSERT INTO prompt_combinations (combination_hash, positive_prompt_id, negative_prompt_id)
                 VALUES (?1, ?2, ?3)",
                &[&combination_hash, &positive_id, &negative_id],
            )?;
            cache.combinations.insert(combination_hash, id);
            id
        }
    };

    let style_id = if record.art_style.is_empty() {
        None
    } else if let Some(&id) = cache.styles.get(&record.art_style) {
        Some(id)
    } else {
        let id = get_or_create(
            conn,
            "SELECT id FROM art_styles WHERE name = ?1",
            &record.art_style,
            "INSERT INTO art_styles (name) VALUES (?1)",
            &[&record.art_style],
        )?;
        cache.styles.insert(record.art_style.clone(), id);
        Some(id)
    };

    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO images
             (filename, prompt_combination_id, art_style_id, title_id, seed, date_downloaded, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?
        .execute(params![
            record.filename,
            combination_id,
            style_id,
            title_id,
            record.seed,
            record.date_downloaded.map(|d| d.to_string()),
            record.prompt_text().is_empty(),
        ])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::records::StyleEntry;

    fn record(prompt: Option<&str>, negative: &str, style: &str, filename: &str) -> Record {
        Record {
            prompt: prompt.map(str::to_string),
            negative_prompt: negative.to_string(),
            art_style: style.to_string(),
            title: "untitled".to_string(),
            filename: filename.to_string(),
            seed: "42".to_string(),
            date_downloaded: chrono::NaiveDate::from_ymd_opt(2024, 5, 1),
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_import_deduplicates_shared_rows() -> Result<()> {
        let mut importer = RecordImporter::new(":memory:")?.with_buffer_limit(2);
        importer.add(record(Some("a cat"), "blurry", "oil", "1.jpg"))?;
        importer.add(record(Some("a cat"), "blurry", "oil", "2.jpg"))?;
        importer.add(record(Some("a dog"), "", "oil", "3.jpg"))?;
        importer.add(record(Some("a dog"), "", "", "3.jpg"))?;
        importer.add(record(None, "", "", "4.jpg"))?;
        importer.add(record(Some("x"), "", "", ""))?;
        let summary = importer.finish()?;

        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.existing, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed(), 6);

        let conn = importer.connection();
        assert_eq!(count(conn, "images"), 4);
        assert_eq!(count(conn, "positive_prompts"), 2);
        assert_eq!(count(conn, "negative_prompts"), 1);
        assert_eq!(count(conn, "prompt_combinations"), 3);
        assert_eq!(count(conn, "art_styles"), 1);
        assert_eq!(count(conn, "titles"), 1);

        let deleted: i64 = conn.query_row(
            "SELECT deleted FROM images WHERE filename = '4.jpg'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(deleted, 1);
        let date: String = conn.query_row(
            "SELECT date_downloaded FROM images WHERE filename = '1.jpg'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(date, "2024-05-01");
        Ok(())
    }

    #[test]
    fn test_failed_batch_can_be_retried() -> Result<()> {
        let mut importer = RecordImporter::new(":memory:")?.with_buffer_limit(10);
        importer.connection().execute_batch(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON images
             WHEN NEW.filename = 'bad.jpg'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )?;

        importer.add(record(Some("a dog"), "blurry", "oil", "1.jpg"))?;
        importer.add(record(Some("a cat"), "", "", "bad.jpg"))?;
        assert!(importer.flush().is_err());
        assert_eq!(count(importer.connection(), "positive_prompts"), 0);

        // Rows created by the rolled-back batch must not be reused by id.
        importer.connection().execute("DROP TRIGGER reject_bad", [])?;
        let summary = importer.finish()?;
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.existing, 0);

        let conn = importer.connection();
        let prompt: String = conn.query_row(
            "SELECT pp.prompt_text FROM images i
             JOIN prompt_combinations pc ON i.prompt_combination_id = pc.id
             JOIN positive_prompts pp ON pc.positive_prompt_id = pp.id
             WHERE i.filename = '1.jpg'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(prompt, "a dog");
        assert_eq!(count(conn, "negative_prompts"), 1);
        Ok(())
    }

    #[test]
    fn test_import_styles_upserts() -> Result<()> {
        let mut importer = RecordImporter::new(":memory:")?;
        importer.add(record(Some("a cat, in oil"), "", "oil", "1.jpg"))?;
        importer.finish()?;

        let mut styles = StyleMap::new();
        styles.insert(
            "oil".to_string(),
            StyleEntry {
                count: 2,
                style_string: ", in oil".to_string(),
                length: 8,
            },
        );
        assert_eq!(importer.import_styles(&styles)?, 1);

        let conn = importer.connection();
        assert_eq!(count(conn, "art_styles"), 1);
        let style_string: String = conn.query_row(
            "SELECT style_string FROM art_styles WHERE name = 'oil'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(style_string, ", in oil");
        Ok(())
    }
}
