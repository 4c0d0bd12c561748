//! Utils Module
pub mod telemetry;
pub mod truncate;

pub use truncate::{preview, truncate_text, TruncationPolicy};
