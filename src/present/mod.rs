//! Presentation sync: the two views the channel shows.
//!
//! - `summary`: a single embed listing the latest solves, edited in place.
//! - `announce`: one message per newly detected solve, at most three live.

pub mod announce;
pub mod summary;
