//! Markdex: browser bookmark aggregation.
//!
//! Watches native browser bookmark stores, parses them into a tagged node
//! tree, and converges everything into a single queryable SQLite database.

pub mod bookmark;
pub mod browsers;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod store;
pub mod tags;
pub mod tree;
pub mod watch;
