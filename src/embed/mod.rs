//! Embedding Wrapper
//!
//! Turns a normalized chart document into an isolated, self-sizing iframe
//! and keeps the markup in a process-wide store until the host asks for it.

pub mod html;
pub mod store;

use serde::{Deserialize, Serialize};

pub use html::{host_listener, wrap_document, BootPayload};
pub use store::{Artifact, ArtifactRef, ArtifactStore};

/// Pinned chart library build loaded by every artifact
pub const DEFAULT_LIBRARY_URL: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbedConfig {
    /// Script URL of the chart library
    pub library_url: String,
    /// `sandbox` attribute of the iframe
    pub iframe_sandbox: String,
    pub iframe_title: String,
    /// Message returned with every rendered artifact
    pub rendered_message: String,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            library_url: DEFAULT_LIBRARY_URL.to_string(),
            iframe_sandbox: "allow-scripts".to_string(),
            iframe_title: "Plotly Chart".to_string(),
            rendered_message: "Plotly chart rendered.".to_string(),
        }
    }
}
