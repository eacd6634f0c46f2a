//! Hosted repositories and their permission tables.

pub mod table;

pub use table::RepoTable;
