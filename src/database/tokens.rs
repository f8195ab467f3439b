//! Token counts and image→token links in SQLite.
//!
//! A full rebuild clears both tables and walks every live image. An
//! incremental update walks only images that have no link yet and adds its
//! counts onto the stored totals. Both modes commit one transaction per batch,
//! and each batch is selected inside its own write transaction so two
//! overlapping runs never count the same image twice.

use std::collections::HashMap;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::database::cache::LookupCache;
use crate::database::{begin_write, constraint_kind, get_or_create, ConstraintKind};
use crate::text::frequency::{Polarity, TokenCounts};
use crate::text::style::subtract_style;
use crate::text::tokenizer::tokenize;

const DEFAULT_BATCH_SIZE: usize = 1000;
/// Only the first few rejected tokens are logged individually.
const MAX_LOGGED_SKIPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Rebuild,
    Incremental,
}

#[derive(Debug, Default)]
pub struct TokenRunSummary {
    pub images: usize,
    pub tokens_before: i64,
    pub tokens_after: i64,
    pub links: usize,
    pub skipped_tokens: usize,
    /// Occurrences counted during this run.
    pub counts: TokenCounts,
}

impl TokenRunSummary {
    pub fn new_tokens(&self) -> i64 {
        self.tokens_after - self.tokens_before
    }
}

struct PendingImage {
    id: i64,
    prompt: Option<String>,
    negative_prompt: Option<String>,
    style_string: Option<String>,
}

fn polarity_code(polarity: Polarity) -> i64 {
    match polarity {
        Polarity::Positive => 0,
        Polarity::Negative => 1,
    }
}

pub struct TokenIndexer {
    batch_size: usize,
    progress: ProgressBar,
}

impl Default for TokenIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenIndexer {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(&self, conn: &mut Connection, mode: IndexMode) -> Result<TokenRunSummary> {
        let mut summary = TokenRunSummary {
            tokens_before: count_tokens(conn)?,
            ..Default::default()
        };

        if mode == IndexMode::Rebuild {
            info!("Clearing {} tokens", summary.tokens_before);
            let tx = begin_write(conn)?;
            tx.execute("DELETE FROM image_tokens", [])?;
            tx.execute("DELETE FROM tokens", [])?;
            tx.commit().context("Failed to commit transaction")?;
        }

        let pending = count_pending(conn)?;
        info!("{} images to process", pending);
        self.progress.set_length(pending);

        let mut cache = LookupCache::new();
        let mut last_id = 0;
        loop {
            let tx = begin_write(conn)?;
            let batch = load_batch(&tx, last_id, self.batch_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            last_id = last.id;

            index_batch(&tx, &mut cache, &batch, &mut summary)?;
            tx.commit().context("Failed to commit transaction")?;

            summary.images += batch.len();
            self.progress.inc(batch.len() as u64);
        }
        self.progress.finish_and_clear();

        summary.tokens_after = count_tokens(conn)?;
        Ok(summary)
    }
}

fn count_tokens(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))
        .context("Failed to count tokens")
}

const UNLINKED: &str = "i.deleted = 0
    AND NOT EXISTS (SELECT 1 FROM image_tokens it WHERE it.image_id = i.id)";

fn count_pending(conn: &Connection) -> Result<u64> {
    let n: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM images i WHERE {}", UNLINKED),
            [],
            |row| row.get(0),
        )
        .context("Failed to count pending images")?;
    Ok(n as u64)
}

fn load_batch(conn: &Connection, after_id: i64, limit: usize) -> Result<Vec<PendingImage>> {
    let sql = format!(
        "SELECT i.id, pp.prompt_text, np.prompt_text, ast.style_string
         FROM images i
         LEFT JOIN prompt_combinations pc ON i.prompt_combination_id = pc.id
         LEFT JOIN positive_prompts pp ON pc.positive_prompt_id = pp.id
         LEFT JOIN negative_prompts np ON pc.negative_prompt_id = np.id
         LEFT JOIN art_styles ast ON i.art_style_id = ast.id
         WHERE i.id > ?1 AND {}
         ORDER BY i.id
         LIMIT ?2",
        UNLINKED
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![after_id, limit as i64], |row| {
        Ok(PendingImage {
            id: row.get(0)?,
            prompt: row.get(1)?,
            negative_prompt: row.get(2)?,
            style_string: row.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to load images")
}

/// Resolves a token to its row id. `None` when the store refuses the value.
fn token_id(conn: &Connection, cache: &mut LookupCache, token: &str) -> rusqlite::Result<Option<i64>> {
    if let Some(&id) = cache.tokens.get(token) {
        return Ok(Some(id));
    }
    match get_or_create(
        conn,
        "SELECT id FROM tokens WHERE token = ?1",
        token,
        "INSERT INTO tokens (token) VALUES (?1)",
        &[&token],
    ) {
        Ok(id) => {
            cache.tokens.insert(token.to_string(), id);
            Ok(Some(id))
        }
        Err(e) if constraint_kind(&e) == Some(ConstraintKind::Check) => Ok(None),
        Err(e) => Err(e),
    }
}

fn index_batch(
    conn: &Connection,
    cache: &mut LookupCache,
    batch: &[PendingImage],
    summary: &mut TokenRunSummary,
) -> Result<()> {
    // token id -> (positive, negative) occurrences in this batch
    let mut delta: HashMap<i64, (i64, i64)> = HashMap::new();
    let mut link = conn.prepare_cached(
        "INSERT OR IGNORE INTO image_tokens (image_id, token_id, polarity) VALUES (?1, ?2, ?3)",
    )?;

    for image in batch {
        let raw_prompt = image.prompt.as_deref().unwrap_or("");
        let prompt = subtract_style(raw_prompt, image.style_string.as_deref().unwrap_or(""));
        let sides = [
            (Polarity::Positive, &*prompt),
            (Polarity::Negative, image.negative_prompt.as_deref().unwrap_or("")),
        ];

        // Whether this run wrote the link for (token, polarity). A link that
        // already existed belongs to another run, which counted it.
        let mut fresh: HashMap<(i64, Polarity), bool> = HashMap::new();
        for (polarity, text) in sides {
            for token in tokenize(text) {
                let Some(id) = token_id(conn, cache, &token)? else {
                    summary.skipped_tokens += 1;
                    if summary.skipped_tokens <= MAX_LOGGED_SKIPS {
                        let preview: String = token.chars().take(50).collect();
                        warn!(
                            "Skipping {} token rejected by the store: {:?}",
                            polarity.as_str(),
                            preview
                        );
                    }
                    continue;
                };
                let is_fresh = match fresh.get(&(id, polarity)) {
                    Some(&is_fresh) => is_fresh,
                    None => {
                        let written =
                            link.execute(params![image.id, id, polarity_code(polarity)])?;
                        summary.links += written;
                        fresh.insert((id, polarity), written > 0);
                        written > 0
                    }
                };
                if !is_fresh {
                    continue;
                }
                let entry = delta.entry(id).or_default();
                match polarity {
                    Polarity::Positive => entry.0 += 1,
                    Polarity::Negative => entry.1 += 1,
                }
                summary.counts.table_mut(polarity).increment(&token);
            }
        }
    }

    let mut update = conn.prepare_cached(
        "UPDATE tokens
         SET positive_count = positive_count + ?2, negative_count = negative_count + ?3
         WHERE id = ?1",
    )?;
    for (id, (positive, negative)) in delta {
        update.execute(params![id, positive, negative])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repo::RecordImporter;
    use crate::ingest::records::{Record, StyleEntry, StyleMap};

    fn record(prompt: Option<&str>, negative: &str, style: &str, filename: &str) -> Record {
        Record {
            prompt: prompt.map(str::to_string),
            negative_prompt: negative.to_string(),
            art_style: style.to_string(),
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    fn corpus() -> Vec<Record> {
        vec![
            record(Some("Cat, hat, painted in oil"), "blurry, ugly", "oil", "1.jpg"),
            record(Some("dog, HAT"), "blurry", "", "2.jpg"),
            record(Some("cat. cat, painted in oil"), "", "oil", "3.jpg"),
            record(None, "ugly", "", "4.jpg"),
        ]
    }

    fn importer(records: &[Record]) -> Result<RecordImporter> {
        let mut importer = RecordImporter::new(":memory:")?;
        let mut styles = StyleMap::new();
        styles.insert(
            "oil".to_string(),
            StyleEntry {
                count: 2,
                style_string: ", painted in oil".to_string(),
                length: 16,
            },
        );
        importer.import_styles(&styles)?;
        for r in records {
            importer.add(r.clone())?;
        }
        importer.finish()?;
        Ok(importer)
    }

    fn stored(conn: &Connection) -> Result<HashMap<String, (i64, i64)>> {
        let mut stmt = conn.prepare("SELECT token, positive_count, negative_count FROM tokens")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, (r.get(1)?, r.get(2)?))))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    #[test]
    fn test_rebuild_counts_with_style_removed() -> Result<()> {
        let mut conn = importer(&corpus())?.into_connection();
        let summary = TokenIndexer::new().run(&mut conn, IndexMode::Rebuild)?;

        // 4.jpg has no prompt and is marked deleted.
        assert_eq!(summary.images, 3);
        assert_eq!(summary.skipped_tokens, 0);
        assert_eq!(summary.new_tokens(), 5);

        let tokens = stored(&conn)?;
        assert_eq!(tokens["cat"], (3, 0));
        assert_eq!(tokens["hat"], (2, 0));
        assert_eq!(tokens["dog"], (1, 0));
        assert_eq!(tokens["blurry"], (0, 2));
        assert_eq!(tokens["ugly"], (0, 1));
        assert!(!tokens.contains_key("painted in oil"));
        Ok(())
    }

    #[test]
    fn test_incremental_from_empty_matches_rebuild() -> Result<()> {
        let mut rebuilt = importer(&corpus())?.into_connection();
        TokenIndexer::new().run(&mut rebuilt, IndexMode::Rebuild)?;

        let mut incremental = importer(&corpus())?.into_connection();
        TokenIndexer::new()
            .with_batch_size(1)
            .run(&mut incremental, IndexMode::Incremental)?;

        assert_eq!(stored(&rebuilt)?, stored(&incremental)?);
        Ok(())
    }

    #[test]
    fn test_incremental_adds_only_new_images() -> Result<()> {
        let records = corpus();
        let mut importer = importer(&records[..2])?;
        TokenIndexer::new().run(importer.connection_mut(), IndexMode::Incremental)?;

        for r in &records[2..] {
            importer.add(r.clone())?;
        }
        importer.finish()?;
        let mut conn = importer.into_connection();

        let second = TokenIndexer::new().run(&mut conn, IndexMode::Incremental)?;
        assert_eq!(second.images, 1);
        assert_eq!(second.counts.positive.get("cat"), 2);

        let third = TokenIndexer::new().run(&mut conn, IndexMode::Incremental)?;
        assert_eq!(third.images, 0);
        assert_eq!(third.new_tokens(), 0);

        let tokens = stored(&conn)?;
        assert_eq!(tokens["cat"], (3, 0));
        assert_eq!(tokens["hat"], (2, 0));

        // A rebuild over the same data lands on the same totals.
        TokenIndexer::new().run(&mut conn, IndexMode::Rebuild)?;
        assert_eq!(stored(&conn)?, tokens);
        Ok(())
    }

    #[test]
    fn test_stale_batch_does_not_double_count() -> Result<()> {
        let mut conn = importer(&corpus())?.into_connection();

        // Selected before another run indexed the same images.
        let stale = load_batch(&conn, 0, 100)?;
        assert_eq!(stale.len(), 3);
        TokenIndexer::new().run(&mut conn, IndexMode::Incremental)?;
        let expected = stored(&conn)?;

        let mut summary = TokenRunSummary::default();
        let tx = begin_write(&mut conn)?;
        index_batch(&tx, &mut LookupCache::new(), &stale, &mut summary)?;
        tx.commit()?;

        assert_eq!(summary.links, 0);
        assert!(summary.counts.positive.is_empty());
        assert_eq!(stored(&conn)?, expected);
        assert_eq!(expected["cat"], (3, 0));
        Ok(())
    }

    #[test]
    fn test_overlapping_runs_match_rebuild() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gallery.db").to_string_lossy().into_owned();
        let mut importer = RecordImporter::new(&path)?;
        let mut styles = StyleMap::new();
        styles.insert(
            "oil".to_string(),
            StyleEntry {
                count: 2,
                style_string: ", painted in oil".to_string(),
                length: 16,
            },
        );
        importer.import_styles(&styles)?;
        for r in corpus() {
            importer.add(r)?;
        }
        importer.finish()?;
        drop(importer);

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || -> Result<()> {
                    let mut conn = crate::database::open(&path)?;
                    TokenIndexer::new()
                        .with_batch_size(1)
                        .run(&mut conn, IndexMode::Incremental)?;
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("indexer thread panicked"))??;
        }

        let mut conn = crate::database::open(&path)?;
        let incremental = stored(&conn)?;
        TokenIndexer::new().run(&mut conn, IndexMode::Rebuild)?;
        assert_eq!(stored(&conn)?, incremental);
        assert_eq!(incremental["cat"], (3, 0));
        Ok(())
    }

    #[test]
    fn test_rejected_token_is_skipped() -> Result<()> {
        let long = "x".repeat(300);
        let records = vec![record(Some(&format!("cat, {}", long)), "", "", "1.jpg")];
        let mut conn = importer(&records)?.into_connection();

        let summary = TokenIndexer::new().run(&mut conn, IndexMode::Rebuild)?;
        assert_eq!(summary.images, 1);
        assert_eq!(summary.skipped_tokens, 1);
        assert_eq!(stored(&conn)?["cat"], (1, 0));
        Ok(())
    }
}
