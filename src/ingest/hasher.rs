use sha2::{Digest, Sha256};

/// Separator placed between the two halves of a prompt pair before hashing.
/// U+241F (SYMBOL FOR UNIT SEPARATOR) does not occur in scraped prompt text,
/// so ("ab", "c") and ("a", "bc") hash differently.
pub const PAIR_SEPARATOR: char = '\u{241F}';

/// Hex SHA-256 of a UTF-8 string. Used as the natural key for prompt, title
/// and combination rows.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of a (prompt, negative_prompt) pair.
pub fn pair_hash(prompt: &str, negative: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let mut sep = [0u8; 4];
    hasher.update(PAIR_SEPARATOR.encode_utf8(&mut sep).as_bytes());
    hasher.update(negative.as_bytes());
    hex::encode(hasher.finalize())
}
