pub mod frequency;
pub mod style;
pub mod tokenizer;
