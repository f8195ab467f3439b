pub mod hasher;
pub mod records;
pub mod repair;
