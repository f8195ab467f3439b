use std::collections::HashMap;

/// Natural-key → row id lookups for a single run.
///
/// Created empty when a run starts and dropped with it. Keys are the same
/// natural keys the tables enforce as unique (hashes for text columns, the
/// literal name for styles and tokens).
#[derive(Debug, Default)]
pub struct LookupCache {
    pub positive_prompts: HashMap<String, i64>,
    pub negative_prompts: HashMap<String, i64>,
    pub combinations: HashMap<String, i64>,
    pub styles: HashMap<String, i64>,
    pub titles: HashMap<String, i64>,
    pub tokens: HashMap<String, i64>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }
}
