//! External association feed.
//!
//! # Responsibility
//! - Load the feed file into typed candidate links.
//! - Bootstrap an empty feed on first run.
//!
//! # Invariants
//! - The reader never validates referential correctness of candidates.
//! - A malformed feed is reported, never repaired or rewritten.

pub mod reader;

pub use reader::{load_feed, parse_feed, FeedError, FeedLoad, FeedResult, EMPTY_FEED};
