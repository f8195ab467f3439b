use std::collections::HashMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::ingest::records::Record;
use crate::text::style::StyleStrings;
use crate::text::tokenizer::tokenize;

/// Which side of a prompt pair a token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn as_str(self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        }
    }
}

/// Token counter that remembers the order tokens were first seen.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, token: &str, n: u64) {
        match self.index.get(token) {
            Some(&i) => self.entries[i].1 += n,
            None => {
                self.index.insert(token.to_string(), self.entries.len());
                self.entries.push((token.to_string(), n));
            }
        }
    }

    pub fn increment(&mut self, token: &str) {
        self.add(token, 1);
    }

    pub fn get(&self, token: &str) -> u64 {
        self.index.get(token).map_or(0, |&i| self.entries[i].1)
    }

    /// Number of distinct tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, n)| n).sum()
    }

    /// Tokens in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(t, n)| (t.as_str(), *n))
    }

    /// Entries by descending count; equal counts keep first-seen order.
    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut out: Vec<(&str, u64)> = self.iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }

    pub fn top(&self, n: usize) -> Vec<(&str, u64)> {
        let mut sorted = self.sorted();
        sorted.truncate(n);
        sorted
    }

    /// Adds every count of `other` onto this table.
    pub fn absorb(&mut self, other: &FrequencyTable) {
        for (token, n) in other.iter() {
            self.add(token, n);
        }
    }

    /// Plain map view, for order-insensitive comparison.
    pub fn to_map(&self) -> HashMap<String, u64> {
        self.entries.iter().cloned().collect()
    }
}

impl Serialize for FrequencyTable {
    /// Serializes as a JSON object ordered by descending count.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sorted = self.sorted();
        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for (token, n) in sorted {
            map.serialize_entry(token, &n)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub unique_prompt_tokens: usize,
    pub unique_negative_tokens: usize,
    pub total_prompt_occurrences: u64,
    pub total_negative_occurrences: u64,
}

/// Token frequencies of a corpus, split by polarity.
#[derive(Debug, Clone, Default)]
pub struct TokenCounts {
    pub positive: FrequencyTable,
    pub negative: FrequencyTable,
}

impl TokenCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one prompt pair. `prompt` must already have its style string
    /// removed.
    pub fn count_pair(&mut self, prompt: &str, negative_prompt: &str) {
        for token in tokenize(prompt) {
            self.positive.increment(&token);
        }
        for token in tokenize(negative_prompt) {
            self.negative.increment(&token);
        }
    }

    pub fn count_record(&mut self, record: &Record, styles: &StyleStrings) {
        let prompt = styles.strip(record.prompt_text(), &record.art_style);
        self.count_pair(&prompt, &record.negative_prompt);
    }

    pub fn from_records<'a, I>(records: I, styles: &StyleStrings) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut counts = Self::new();
        for record in records {
            counts.count_record(record, styles);
        }
        counts
    }

    pub fn table_mut(&mut self, polarity: Polarity) -> &mut FrequencyTable {
        match polarity {
            Polarity::Positive => &mut self.positive,
            Polarity::Negative => &mut self.negative,
        }
    }

    pub fn absorb(&mut self, other: &TokenCounts) {
        self.positive.absorb(&other.positive);
        self.negative.absorb(&other.negative);
    }

    pub fn stats(&self) -> TokenStats {
        TokenStats {
            unique_prompt_tokens: self.positive.len(),
            unique_negative_tokens: self.negative.len(),
            total_prompt_occurrences: self.positive.total(),
            total_negative_occurrences: self.negative.total(),
        }
    }
}

/// Layout of `tokens.json`.
#[derive(Debug, Serialize)]
pub struct TokenReport<'a> {
    pub prompt_tokens: &'a FrequencyTable,
    pub negative_prompt_tokens: &'a FrequencyTable,
    pub stats: TokenStats,
}

impl<'a> From<&'a TokenCounts> for TokenReport<'a> {
    fn from(counts: &'a TokenCounts) -> Self {
        Self {
            prompt_tokens: &counts.positive,
            negative_prompt_tokens: &counts.negative,
            stats: counts.stats(),
        }
    }
}
