use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub id: String,
    pub hash: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub count: usize,
    pub filenames: Vec<String>,
}

/// On-disk layout of `grouped.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupIndex {
    pub generated_at: String,
    pub source_file: String,
    pub group_count: usize,
    pub groups: Vec<GroupEntry>,
    #[serde(default)]
    pub orphans: Vec<String>,
}

impl GroupIndex {
    pub fn new(source_file: &str, groups: Vec<GroupEntry>, orphans: Vec<String>) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            source_file: source_file.to_string(),
            group_count: groups.len(),
            groups,
            orphans,
        }
    }

    /// Reads a prior index. A missing file is an empty index, so the first
    /// run merges into nothing.
    pub fn load(path: &Path) -> Result<Option<Self>, InputError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| InputError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let index = serde_json::from_str(&content).map_err(|source| InputError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(index))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write group index {:?}", path))?;
        Ok(())
    }
}
