pub mod engine;
pub mod folders;
pub mod index;
