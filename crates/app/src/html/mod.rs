//! Embedded static HTML assets served by the preview board.
//!
//! The assets are kept as `&'static str` so they can be bundled directly inside
//! the binary without filesystem lookups.

pub mod dashboard;
