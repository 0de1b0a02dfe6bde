// src/process/mod.rs

//! Platform process plumbing: subtree termination and scheduling priority.

pub mod kill_tree;
pub mod priority;

pub use kill_tree::{kill_tree, DEFAULT_KILL_GRACE};
