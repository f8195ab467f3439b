use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::RepairError;

/// How a corrupted document was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMethod {
    /// Cut after the first structurally complete top-level array.
    BracketDepth,
    /// Cut at the first `]` `[` boundary between concatenated arrays.
    ArrayBoundary,
}

#[derive(Debug)]
pub struct Repaired {
    pub items: Vec<Value>,
    pub method: RepairMethod,
    /// Byte offset where the kept document ends.
    pub valid_len: usize,
    pub discarded_bytes: usize,
}

/// Byte offset just past the first complete top-level array, ignoring
/// brackets inside string literals.
fn first_array_end(content: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in content.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Offset of the `]` closing the first array where a second array is
/// appended directly after it (`] [` with optional whitespace).
fn array_boundary(content: &str) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut search = 0;
    while let Some(pos) = content[search..].find(']') {
        let close = search + pos;
        let next = bytes[close + 1..]
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map(|p| close + 1 + p);
        if let Some(open) = next {
            if bytes[open] == b'[' {
                return Some(close + 1);
            }
        }
        search = close + 1;
    }
    None
}

fn parse_prefix(content: &str, end: usize) -> Option<Vec<Value>> {
    serde_json::from_str::<Vec<Value>>(&content[..end]).ok()
}

/// Recovers the first JSON array from a document that was written more than
/// once (several arrays concatenated) or has trailing garbage.
pub fn repair_json_array(content: &str) -> Result<Repaired, RepairError> {
    if !content.trim_start().starts_with('[') {
        return Err(RepairError::NotAnArray);
    }

    if let Some(end) = first_array_end(content) {
        if let Some(items) = parse_prefix(content, end) {
            return Ok(Repaired {
                items,
                method: RepairMethod::BracketDepth,
                valid_len: end,
                discarded_bytes: content.len() - end,
            });
        }
        warn!("bracket scan ended at byte {} but the prefix does not parse", end);
    }

    if let Some(end) = array_boundary(content) {
        if let Some(items) = parse_prefix(content, end) {
            return Ok(Repaired {
                items,
                method: RepairMethod::ArrayBoundary,
                valid_len: end,
                discarded_bytes: content.len() - end,
            });
        }
        return Err(RepairError::Unrecoverable(format!(
            "prefix before array boundary at byte {} is not valid JSON",
            end
        )));
    }

    Err(RepairError::Unrecoverable(
        "no complete top-level array found".to_string(),
    ))
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

/// Repairs `path` in place, keeping the original bytes in `<path>.backup`.
pub fn repair_file(path: &Path) -> Result<Repaired> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    info!("File size: {} bytes", content.len());

    let repaired = repair_json_array(&content)
        .with_context(|| format!("Failed to repair {:?}", path))?;
    info!(
        "Recovered {} items via {:?}, discarding {} trailing bytes",
        repaired.items.len(),
        repaired.method,
        repaired.discarded_bytes
    );

    let backup = backup_path(path);
    fs::write(&backup, &content).with_context(|| format!("Failed to write backup {:?}", backup))?;
    info!("Saved backup to {:?}", backup);

    let out = serde_json::to_string_pretty(&repaired.items)?;
    fs::write(path, out).with_context(|| format!("Failed to write repaired file {:?}", path))?;
    Ok(repaired)
}
