//! Pdfium-backed rasterizer and document writer for `pdfedit-core`.

pub mod metrics;
pub mod output;
#[cfg(feature = "pdf")]
mod pdfium;

pub use output::{to_rgba_image, write_image};
#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumDocument, PdfiumProvider, PDFIUM_LIBRARY_ENV};
