//! Delimiter-based prompt tokenizer.
//!
//! Prompts are split on `,`, `.`, newlines and the literal two-character
//! sequence `\n` (left behind when JSON was serialized twice). There is no
//! quoting: a delimiter always splits.

const DELIMITERS: [char; 3] = [',', '.', '\n'];
const ESCAPED_NEWLINE: &str = "\\n";

/// Trimmed, non-empty pieces of `text` in their original case.
pub fn split_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(DELIMITERS)
        .flat_map(|piece| piece.split(ESCAPED_NEWLINE))
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
}

/// Normalized tokens of `text`: trimmed, non-empty and lowercased.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    split_tokens(text).map(str::to_lowercase)
}
