pub mod keys;
pub mod operations;
