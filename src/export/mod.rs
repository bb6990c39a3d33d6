use thiserror::Error;

pub mod compose;
pub mod document;
pub mod fetch;
pub mod pipeline;

pub use compose::{CaptionFont, CompositionOptions, FontColor, Placement, RenderedPage, compose};
pub use document::{ExportDocument, png_blob, png_filename};
pub use fetch::{HttpFetcher, ImageFetcher, LoadError};
pub use pipeline::{CancelHandle, ExportOutcome, ExportPhase, ExportProgress, Exporter, ExporterConfig};

/// Failures in the export pipeline. Load and render errors are recovered
/// per image during a batch; finalize errors abort the whole export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("render failed: {0}")]
    Render(String),
    #[error("failed to finalize export: {0}")]
    Finalize(String),
}
