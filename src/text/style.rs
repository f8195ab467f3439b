//! Art-style boilerplate detection and removal.
//!
//! Every art style on the gallery appends a fixed template to the user's
//! prompt. The template is recovered as the longest substring common to all
//! prompts of that style and stripped before tokenizing.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::ingest::records::{Record, StyleEntry, StyleMap};

/// Prompts longer than this (in characters) are ignored when learning styles.
pub const MAX_STYLE_PROMPT_CHARS: usize = 3000;

/// Removes every occurrence of `style_string` from `prompt`. Removal repeats
/// until none is left, so applying it twice changes nothing.
pub fn subtract_style<'a>(prompt: &'a str, style_string: &str) -> Cow<'a, str> {
    if style_string.is_empty() || !prompt.contains(style_string) {
        return Cow::Borrowed(prompt);
    }
    let mut out = prompt.replace(style_string, "");
    while out.contains(style_string) {
        out = out.replace(style_string, "");
    }
    Cow::Owned(out)
}

/// Lookup from art style name to its style string.
#[derive(Debug, Clone, Default)]
pub struct StyleStrings {
    by_style: HashMap<String, String>,
}

impl StyleStrings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, style: impl Into<String>, style_string: impl Into<String>) {
        self.by_style.insert(style.into(), style_string.into());
    }

    pub fn get(&self, style: &str) -> Option<&str> {
        self.by_style.get(style).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_style.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_style.is_empty()
    }

    /// Strips the style string of `art_style` from `prompt`. Unknown or empty
    /// styles pass the prompt through.
    pub fn strip<'a>(&self, prompt: &'a str, art_style: &str) -> Cow<'a, str> {
        if art_style.is_empty() {
            return Cow::Borrowed(prompt);
        }
        match self.get(art_style) {
            Some(style_string) => subtract_style(prompt, style_string),
            None => Cow::Borrowed(prompt),
        }
    }
}

impl From<&StyleMap> for StyleStrings {
    fn from(map: &StyleMap) -> Self {
        let by_style = map
            .iter()
            .map(|(style, entry)| (style.clone(), entry.style_string.clone()))
            .collect();
        Self { by_style }
    }
}

/// Longest substring of the first string that occurs in all the others.
///
/// Lengths are tried longest first and offsets left to right, so ties go to
/// the leftmost candidate in the first string. The winner is trimmed. Returns
/// `None` for fewer than two strings or when nothing non-blank is shared.
pub fn longest_common_substring<S: AsRef<str>>(strings: &[S]) -> Option<String> {
    if strings.len() < 2 {
        return None;
    }
    let base = strings[0].as_ref();
    let others: Vec<&str> = strings[1..].iter().map(AsRef::as_ref).collect();

    // Char boundaries of the reference, including the end.
    let bounds: Vec<usize> = base
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(base.len()))
        .collect();
    let base_chars = bounds.len() - 1;
    let max_len = others
        .iter()
        .map(|s| s.chars().count())
        .min()
        .unwrap_or(0)
        .min(base_chars);

    for len in (1..=max_len).rev() {
        for start in 0..=(base_chars - len) {
            let candidate = &base[bounds[start]..bounds[start + len]];
            if others.iter().all(|s| s.contains(candidate)) {
                let trimmed = candidate.trim();
                return if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                };
            }
        }
    }
    None
}

/// Learns the style string of every art style from scraped records.
pub fn derive_style_map(records: &[Record]) -> StyleMap {
    let mut prompts_by_style: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for record in records {
        let prompt = record.prompt_text();
        if record.art_style.is_empty()
            || prompt.is_empty()
            || prompt.chars().count() > MAX_STYLE_PROMPT_CHARS
        {
            continue;
        }
        prompts_by_style
            .entry(record.art_style.as_str())
            .or_default()
            .push(prompt);
    }

    let mut map = StyleMap::new();
    for (style, prompts) in prompts_by_style {
        if prompts.len() < 2 {
            debug!("skipping style {:?}: only one prompt", style);
            continue;
        }
        let Some(common) = longest_common_substring(&prompts[..]) else {
            debug!("skipping style {:?}: no common substring", style);
            continue;
        };
        let length = common.chars().count();
        info!(
            "{}: {} prompts, common string length: {}",
            style,
            prompts.len(),
            length
        );
        map.insert(
            style.to_string(),
            StyleEntry {
                count: prompts.len(),
                style_string: common,
                length,
            },
        );
    }
    map
}
