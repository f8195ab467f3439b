use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::InputError;

/// One scraped gallery entry from `results.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// `None` when the scraper found no prompt; such images are orphans.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub negative_prompt: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub art_style: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filename: String,
    #[serde(default, deserialize_with = "seed_as_string")]
    pub seed: String,
    #[serde(default)]
    pub date_downloaded: Option<NaiveDate>,
}

impl Record {
    pub fn prompt_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or("")
    }

    pub fn has_filename(&self) -> bool {
        !self.filename.is_empty()
    }
}

/// Entry of `style_prompts.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleEntry {
    pub count: usize,
    pub style_string: String,
    pub length: usize,
}

pub type StyleMap = BTreeMap<String, StyleEntry>;

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// Older scrapes stored the seed as a number.
fn seed_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seed {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Seed>::deserialize(deserializer)? {
        Some(Seed::Text(s)) => s,
        Some(Seed::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, InputError> {
    if !path.exists() {
        return Err(InputError::Missing(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| InputError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads `results.json`, optionally keeping only the first `limit` entries.
pub fn load_records(path: &Path, limit: Option<usize>) -> Result<Vec<Record>, InputError> {
    let mut records: Vec<Record> = read_json(path)?;
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    Ok(records)
}

pub fn load_style_map(path: &Path) -> Result<StyleMap, InputError> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_record_optional_fields() -> anyhow::Result<()> {
        let json = r#"[
            {"prompt": "a cat", "negative_prompt": null, "seed": 1234,
             "title": "Cat", "filename": "1.jpg", "date_downloaded": "2024-03-01",
             "art_style": "anime"},
            {"filename": "2.jpg", "seed": "-1"}
        ]"#;
        let records: Vec<Record> = serde_json::from_str(json)?;

        assert_eq!(records[0].prompt.as_deref(), Some("a cat"));
        assert_eq!(records[0].negative_prompt, "");
        assert_eq!(records[0].seed, "1234");
        assert_eq!(
            records[0].date_downloaded,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );

        assert_eq!(records[1].prompt, None);
        assert_eq!(records[1].seed, "-1");
        assert_eq!(records[1].prompt_text(), "");
        Ok(())
    }

    #[test]
    fn test_load_records_errors() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("results.json");
        assert!(matches!(
            load_records(&missing, None),
            Err(InputError::Missing(_))
        ));

        let mut file = fs::File::create(&missing)?;
        write!(file, "[{{\"prompt\": \"a\"}}")?;
        assert!(matches!(
            load_records(&missing, None),
            Err(InputError::Malformed { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_records_limit() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("results.json");
        fs::write(
            &path,
            r#"[{"prompt":"a","filename":"1.jpg"},{"prompt":"b","filename":"2.jpg"}]"#,
        )?;
        let records = load_records(&path, Some(1))?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "1.jpg");
        Ok(())
    }
}
