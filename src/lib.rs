//! Chart Agency
//!
//! Turns chart snippets written by a conversational agent into isolated,
//! responsive, interactive chart artifacts:
//! - Restricted snippet interpreter with table and chart libraries
//! - Declarative chart documents with normalized update menus
//! - Viewport-driven sizing and linked click interactions
//! - Sandboxed iframe embedding with a process-wide artifact store

pub mod chart;
pub mod config;
pub mod data;
pub mod embed;
pub mod error;
pub mod renderer;
pub mod sandbox;
pub mod server;
pub mod utils;

// Re-exports for convenience
pub use chart::{ChartDocument, Figure};
pub use config::ChartConfig;
pub use data::{DataFetcher, ResultSet};
pub use embed::{ArtifactRef, ArtifactStore};
pub use error::{ChartError, ChartResult};
pub use renderer::{ChartRenderer, RenderOutcome};
pub use sandbox::Sandbox;
