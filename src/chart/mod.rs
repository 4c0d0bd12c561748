//! Chart model
//!
//! Everything between the figure a snippet builds and the document the
//! browser draws: serialization, menu normalization, sizing, the linked
//! interaction contract, and the event model they share.

pub mod document;
pub mod figure;
pub mod linked;
pub mod normalize;
pub mod patch;
pub mod render_state;
pub mod serializer;
pub mod sizing;
pub mod trace;

pub use document::{Annotation, Button, ChartDocument, Layout, Menu};
pub use figure::{CellKind, Figure, FigureError, SubplotGrid};
pub use linked::{
    InteractionState, LinkedInteractionEngine, LinkedInteractionSpec, Payload,
    TitleAnnotationFallback, LINKED_INTERACTION_META_KEY,
};
pub use normalize::{normalize_per_trace_value, normalize_update_menus, strip_fragile_annotation_keys};
pub use render_state::{
    preflight, ChartEvent, ChartSession, EventHandler, MenuController, PreflightReport,
    RenderCommand, RenderState,
};
pub use sizing::{SizingConfig, SizingController, SizingPolicy};
pub use trace::{Trace, TraceKind};
