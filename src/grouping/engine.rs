//! Groups images by identical (prompt, negative_prompt) pairs.

use std::collections::{BTreeSet, HashMap};

use crate::grouping::index::{GroupEntry, GroupIndex};
use crate::ingest::hasher::pair_hash;
use crate::ingest::records::Record;

/// Characters of the prompt used as the ordering key.
const SORT_PREFIX_CHARS: usize = 80;
const MAX_SLUG_LEN: usize = 64;

/// Collapses whitespace runs to single spaces and trims.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub prompt: String,
    pub negative_prompt: String,
}

impl GroupKey {
    pub fn new(prompt: &str, negative_prompt: &str) -> Self {
        Self {
            prompt: normalize_whitespace(prompt),
            negative_prompt: normalize_whitespace(negative_prompt),
        }
    }

    /// First `len` hex characters of the pair hash, used as folder name.
    pub fn slug(&self, len: usize) -> String {
        let mut hash = pair_hash(&self.prompt, &self.negative_prompt);
        hash.truncate(len.min(MAX_SLUG_LEN));
        hash
    }

    fn sort_prefix(&self) -> String {
        self.prompt.chars().take(SORT_PREFIX_CHARS).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub min_count: usize,
    pub slug_length: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            min_count: 1,
            slug_length: 10,
        }
    }
}

/// Groups in first-seen order plus the set of orphan filenames.
///
/// Each filename lives in at most one group. A filename seen again under a
/// different key moves to that group, since a re-scrape supersedes the older
/// record.
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    groups: Vec<(GroupKey, Vec<String>)>,
    slots: HashMap<GroupKey, usize>,
    owner: HashMap<String, usize>,
    orphans: BTreeSet<String>,
}

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a set from a previously written index.
    pub fn from_index(index: &GroupIndex) -> Self {
        let mut set = Self::new();
        for group in &index.groups {
            let key = GroupKey::new(&group.prompt, &group.negative_prompt);
            for filename in &group.filenames {
                set.add_filename(key.clone(), filename);
            }
            set.slot(key);
        }
        set.orphans.extend(index.orphans.iter().cloned());
        set
    }

    fn slot(&mut self, key: GroupKey) -> usize {
        if let Some(&i) = self.slots.get(&key) {
            return i;
        }
        let i = self.groups.len();
        self.slots.insert(key.clone(), i);
        self.groups.push((key, Vec::new()));
        i
    }

    fn add_filename(&mut self, key: GroupKey, filename: &str) {
        let target = self.slot(key);
        match self.owner.get(filename).copied() {
            Some(current) if current == target => {}
            Some(current) => {
                self.groups[current].1.retain(|f| f != filename);
                self.groups[target].1.push(filename.to_string());
                self.owner.insert(filename.to_string(), target);
            }
            None => {
                self.groups[target].1.push(filename.to_string());
                self.owner.insert(filename.to_string(), target);
            }
        }
    }

    /// Adds one record. Records without a prompt become orphans; records
    /// without a filename still register their key.
    pub fn insert(&mut self, record: &Record) {
        let Some(prompt) = record.prompt.as_deref() else {
            if record.has_filename() {
                self.orphans.insert(record.filename.clone());
            }
            return;
        };
        let key = GroupKey::new(prompt, &record.negative_prompt);
        if record.has_filename() {
            self.add_filename(key, &record.filename);
        } else {
            self.slot(key);
        }
    }

    pub fn extend<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a Record>,
    {
        for record in records {
            self.insert(record);
        }
    }

    /// Filename-set union per key, orphan set union.
    pub fn merge(&mut self, other: &GroupSet) {
        for (key, filenames) in &other.groups {
            self.slot(key.clone());
            for filename in filenames {
                self.add_filename(key.clone(), filename);
            }
        }
        self.orphans.extend(other.orphans.iter().cloned());
    }

    pub fn filenames(&self, key: &GroupKey) -> Option<&[String]> {
        self.slots.get(key).map(|&i| self.groups[i].1.as_slice())
    }

    pub fn orphans(&self) -> &BTreeSet<String> {
        &self.orphans
    }

    /// Number of keys, including ones that currently hold no filenames.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Filters, ranks and numbers the groups.
    ///
    /// Groups holding more than one image come first by descending count,
    /// then single-image groups; both tie-break on the first 80 characters
    /// of the prompt.
    pub fn build_index(&self, options: IndexOptions, source_file: &str) -> GroupIndex {
        let mut multi = Vec::new();
        let mut single = Vec::new();

        for (key, filenames) in &self.groups {
            let count = filenames.len();
            if count == 0 || count < options.min_count {
                continue;
            }
            let ranked = (key.sort_prefix(), key, filenames);
            if count > 1 {
                multi.push(ranked);
            } else {
                single.push(ranked);
            }
        }

        multi.sort_by(|a, b| b.2.len().cmp(&a.2.len()).then_with(|| a.0.cmp(&b.0)));
        single.sort_by(|a, b| a.0.cmp(&b.0));

        let groups: Vec<GroupEntry> = multi
            .into_iter()
            .chain(single)
            .enumerate()
            .map(|(i, (_, key, filenames))| GroupEntry {
                id: format!("group_{:04}", i + 1),
                hash: key.slug(options.slug_length),
                prompt: key.prompt.clone(),
                negative_prompt: key.negative_prompt.clone(),
                count: filenames.len(),
                filenames: filenames.clone(),
            })
            .collect();

        GroupIndex::new(source_file, groups, self.orphans.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(prompt: Option<&str>, negative: &str, filename: &str) -> Record {
        Record {
            prompt: prompt.map(str::to_string),
            negative_prompt: negative.to_string(),
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalization_merges_whitespace_variants() {
        assert_eq!(normalize_whitespace("  a   b\n c "), "a b c");
        assert_eq!(GroupKey::new("a   b\n c", ""), GroupKey::new("a b c", ""));

        let mut set = GroupSet::new();
        set.extend(&[
            record(Some("a   b\n c"), "", "1.jpg"),
            record(Some("a b c"), "", "2.jpg"),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.filenames(&GroupKey::new("a b c", "")),
            Some(&["1.jpg".to_string(), "2.jpg".to_string()][..])
        );
    }

    #[test]
    fn test_end_to_end_ranking() {
        let mut set = GroupSet::new();
        set.extend(&[
            record(Some("a"), "", "1.jpg"),
            record(Some("a"), "", "2.jpg"),
            record(Some("b"), "", "3.jpg"),
        ]);
        let index = set.build_index(
            IndexOptions {
                min_count: 1,
                slug_length: 10,
            },
            "results.json",
        );

        assert_eq!(index.group_count, 2);
        let first = &index.groups[0];
        assert_eq!(first.id, "group_0001");
        assert_eq!(first.prompt, "a");
        assert_eq!(first.count, 2);
        assert_eq!(first.filenames, vec!["1.jpg", "2.jpg"]);
        assert_eq!(first.hash.len(), 10);

        let second = &index.groups[1];
        assert_eq!(second.id, "group_0002");
        assert_eq!(second.prompt, "b");
        assert_eq!(second.filenames, vec!["3.jpg"]);
    }

    #[test]
    fn test_ranking_ties_and_min_count() {
        let mut set = GroupSet::new();
        set.extend(&[
            record(Some("zebra"), "", "z1"),
            record(Some("zebra"), "", "z2"),
            record(Some("apple"), "", "a1"),
            record(Some("apple"), "", "a2"),
            record(Some("mango"), "", "m1"),
            record(Some("mango"), "", "m2"),
            record(Some("mango"), "", "m3"),
            record(Some("kiwi"), "", "k1"),
            record(Some("banana"), "", "b1"),
        ]);

        let all = set.build_index(IndexOptions::default(), "r");
        let order: Vec<&str> = all.groups.iter().map(|g| g.prompt.as_str()).collect();
        assert_eq!(order, vec!["mango", "apple", "zebra", "banana", "kiwi"]);

        let multi_only = set.build_index(
            IndexOptions {
                min_count: 2,
                slug_length: 10,
            },
            "r",
        );
        assert_eq!(multi_only.group_count, 3);
        assert_eq!(multi_only.groups[2].id, "group_0003");
    }

    #[test]
    fn test_sort_uses_prompt_prefix_only() {
        let base = "p".repeat(SORT_PREFIX_CHARS);
        let mut set = GroupSet::new();
        set.extend(&[
            record(Some(&format!("{}z", base)), "", "1"),
            record(Some(&format!("{}a", base)), "", "2"),
        ]);
        let index = set.build_index(IndexOptions::default(), "r");
        // Equal prefixes keep first-seen order.
        assert_eq!(index.groups[0].filenames, vec!["1"]);
    }

    #[test]
    fn test_orphans_and_negative_prompt_split() {
        let mut set = GroupSet::new();
        set.extend(&[
            record(None, "", "o.jpg"),
            record(None, "", "o.jpg"),
            record(Some("a"), "", "1.jpg"),
            record(Some("a"), "blurry", "2.jpg"),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.orphans().len(), 1);

        let index = set.build_index(IndexOptions::default(), "r");
        assert_eq!(index.orphans, vec!["o.jpg"]);
        assert_ne!(index.groups[0].hash, index.groups[1].hash);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let new_records = vec![
            record(Some("a"), "", "1.jpg"),
            record(Some("a"), "", "2.jpg"),
            record(None, "", "o.jpg"),
        ];
        let mut batch = GroupSet::new();
        batch.extend(&new_records);

        let mut once = GroupSet::new();
        once.merge(&batch);
        let mut twice = once.clone();
        twice.merge(&batch);

        let key = GroupKey::new("a", "");
        assert_eq!(once.filenames(&key), twice.filenames(&key));
        assert_eq!(twice.filenames(&key).map(<[String]>::len), Some(2));
        assert_eq!(once.orphans(), twice.orphans());
    }

    #[test]
    fn test_merge_with_prior_index() {
        let mut prior = GroupSet::new();
        prior.extend(&[record(Some("a"), "", "1.jpg"), record(None, "", "o1")]);
        let prior_index = prior.build_index(IndexOptions::default(), "r");

        let mut merged = GroupSet::from_index(&prior_index);
        let mut batch = GroupSet::new();
        batch.extend(&[
            record(Some("a"), "", "1.jpg"),
            record(Some("a"), "", "3.jpg"),
            record(Some("c"), "", "4.jpg"),
            record(None, "", "o2"),
        ]);
        merged.merge(&batch);

        assert_eq!(
            merged.filenames(&GroupKey::new("a", "")),
            Some(&["1.jpg".to_string(), "3.jpg".to_string()][..])
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.orphans().len(), 2);
    }

    #[test]
    fn test_filename_moves_to_newer_key() {
        let mut set = GroupSet::new();
        set.extend(&[
            record(Some("old"), "", "1.jpg"),
            record(Some("new"), "", "1.jpg"),
        ]);
        assert_eq!(set.filenames(&GroupKey::new("old", "")), Some(&[][..]));
        let index = set.build_index(IndexOptions::default(), "r");
        assert_eq!(index.group_count, 1);
        assert_eq!(index.groups[0].prompt, "new");
    }

    #[test]
    fn test_slug_length() {
        let key = GroupKey::new("a", "");
        assert_eq!(key.slug(6).len(), 6);
        assert_eq!(key.slug(500).len(), 64);
        assert!(key.slug(64).starts_with(&key.slug(6)));
    }
}
