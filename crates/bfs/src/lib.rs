#![forbid(unsafe_code)]
//! BoxFS public API facade.
//!
//! Re-exports the filesystem surface from `bfs-core` through a stable
//! external interface. This is the crate downstream consumers (CLI, tools)
//! depend on.

pub use bfs_core::*;
