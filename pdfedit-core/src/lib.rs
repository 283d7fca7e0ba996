//! Editable text layer over fixed-layout document pages.
//!
//! The crate derives text runs from positioned glyph items, maps pointer
//! positions onto them, commits text rewrites through a [`DocumentWriter`]
//! (falling back to an annotation overlay), and keeps a branching undo/redo
//! log plus a small cache of rendered pages. Rendering and document I/O are
//! collaborators behind the traits defined here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod annotation;
pub mod cache;
pub mod commit;
pub mod config;
pub mod error;
pub mod geometry;
pub mod history;
pub mod runs;
pub mod session;
pub mod style;

pub use annotation::{Annotation, AnnotationId, AnnotationKind, AnnotationLayer};
pub use cache::{CacheStats, RenderCache};
pub use commit::{CommitOptions, CommitReport, CommitTier, EditCommitter, EditStatus, RunEdit};
pub use config::EditorConfig;
pub use error::{EditError, WriterError};
pub use geometry::{Color, CoordinateMapper, Point, Rect, ScreenRect, ViewportDescriptor};
pub use history::{
    BranchId, EditRecord, HistoryManager, HistoryNotice, HistoryStep, MergeStrategy,
};
pub use hit_test::HitTester;
pub use runs::{PageRuns, PositionedGlyphItem, RunExtractor, RunId, TextRun, TextSelection};
pub use session::{EditorSession, TextHit};
pub use style::{StandardFont, TextFormat, TextStyle};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
    /// The writer will reject every mutation (encrypted or locked source).
    pub read_only: bool,
}

/// RGBA8 bitmap of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Width of `text` set in `font` at `size`, in document units. Must grow
/// monotonically with the text's length for hit-testing to be correct.
pub trait TextMeasure {
    fn measure_text(&self, text: &str, font: &str, size: f32) -> f32;
}

pub trait Rasterizer {
    /// Page width and height in document units.
    fn page_size(&self, page: usize) -> Result<(f32, f32)>;
    fn render(&self, page: usize, viewport: &ViewportDescriptor) -> Result<RenderImage>;
    fn glyph_items(&self, page: usize) -> Result<Vec<PositionedGlyphItem>>;
}

/// Text to be set into the page content.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawText {
    pub text: String,
    /// Baseline start, document space.
    pub origin: Point,
    /// Family requested by the caller, kept for diagnostics.
    pub family: String,
    pub font: StandardFont,
    pub size: f32,
    pub color: Color,
}

pub trait DocumentWriter {
    /// Reports whether `draw_text` would accept `text`, without touching the
    /// page.
    fn check_text(&self, _page: usize, _text: &DrawText) -> Result<(), WriterError> {
        Ok(())
    }
    fn erase_region(&self, page: usize, rect: Rect, background: Color) -> Result<(), WriterError>;
    fn draw_text(&self, page: usize, text: &DrawText) -> Result<(), WriterError>;
    fn stroke_line(
        &self,
        page: usize,
        from: Point,
        to: Point,
        width: f32,
        color: Color,
    ) -> Result<(), WriterError>;
    fn serialize(&self) -> Result<Vec<u8>, WriterError>;
}

pub trait DocumentBackend: Rasterizer + DocumentWriter + TextMeasure + Send + Sync {
    fn info(&self) -> &DocumentInfo;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}
