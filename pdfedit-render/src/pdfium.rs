use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfedit_core::runs::TextDirection;
use pdfedit_core::{
    Color, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider, DocumentWriter,
    DrawText, Point, PositionedGlyphItem, Rasterizer, Rect, RenderImage, StandardFont,
    TextMeasure, ViewportDescriptor, WriterError,
};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

use crate::metrics;

/// Environment variable naming a pdfium shared library to bind before the
/// working-directory and system lookups.
pub const PDFIUM_LIBRARY_ENV: &str = "PDFEDIT_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let document = PdfiumDocument::new(Arc::clone(&self.pdfium), absolute)?;
        Ok(Arc::new(document))
    }
}

/// One pdfium document, loaded once and mutated in place by the writer.
pub struct PdfiumDocument {
    info: DocumentInfo,
    document: Mutex<PdfDocument<'static>>,
    /// Keeps the bindings `document` points into alive.
    _pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_file(&path, None)
            .with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`, which is
        // stored in `_pdfium`. Fields drop in declaration order, so `document`
        // is dropped before the Arc holding those bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let info = build_document_info(&document, &path);
        if info.read_only {
            warn!(path = %path.display(), "document forbids content modification");
        }
        Ok(Self {
            info,
            document: Mutex::new(document),
            _pdfium: pdfium,
        })
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        f(&mut guard)
    }

    fn ensure_writable(&self) -> Result<(), WriterError> {
        if self.info.read_only {
            return Err(WriterError::DocumentReadOnly);
        }
        Ok(())
    }

    /// Loads a page, lets `f` add objects to it and regenerates its content
    /// stream.
    fn edit_page<F>(&self, page: usize, f: F) -> Result<(), WriterError>
    where
        F: FnOnce(&mut PdfPage<'_>) -> Result<()>,
    {
        self.ensure_writable()?;
        self.with_document(|document| {
            let index = page_index(page)?;
            let mut pdf_page = document
                .pages()
                .get(index)
                .with_context(|| format!("page {} out of range", page))?;
            f(&mut pdf_page)?;
            pdf_page
                .regenerate_content()
                .with_context(|| format!("failed to regenerate content of page {}", page))?;
            Ok(())
        })?;
        Ok(())
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }
}

impl Rasterizer for PdfiumDocument {
    fn page_size(&self, page: usize) -> Result<(f32, f32)> {
        self.with_document(|document| {
            let pdf_page = document
                .pages()
                .get(page_index(page)?)
                .with_context(|| format!("page {} out of range", page))?;
            Ok((pdf_page.width().value, pdf_page.height().value))
        })
    }

    #[instrument(skip(self))]
    fn render(&self, page: usize, viewport: &ViewportDescriptor) -> Result<RenderImage> {
        self.with_document(|document| {
            let pdf_page = document
                .pages()
                .get(page_index(page)?)
                .with_context(|| format!("page {} out of range", page))?;
            let config = PdfRenderConfig::new().scale_page_by_factor(viewport.scale.max(0.1));
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page))?;
            let image = bitmap.as_image().to_rgba8();
            Ok(RenderImage {
                width: image.width(),
                height: image.height(),
                pixels: image.into_raw(),
            })
        })
    }

    /// One item per pdfium text segment; segments never span lines.
    fn glyph_items(&self, page: usize) -> Result<Vec<PositionedGlyphItem>> {
        self.with_document(|document| {
            let pdf_page = document
                .pages()
                .get(page_index(page)?)
                .with_context(|| format!("page {} out of range", page))?;
            let text = pdf_page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page))?;

            let mut items = Vec::new();
            for segment in text.segments().iter() {
                let bounds = segment.bounds();
                let x = bounds.left().value;
                let width = bounds.right().value - x;
                let first = segment.chars().ok().and_then(|chars| {
                    chars.iter().next().map(|ch| {
                        (
                            ch.font_name(),
                            ch.scaled_font_size().value,
                            ch.origin_y().ok().map(|y| y.value),
                        )
                    })
                });
                let (font_name, font_size, origin_y) = first.unwrap_or_else(|| {
                    (
                        StandardFont::Helvetica.postscript_name().to_owned(),
                        bounds.top().value - bounds.bottom().value,
                        None,
                    )
                });
                let line = vertical_extent(bounds.bottom().value, bounds.top().value, origin_y);
                items.push(PositionedGlyphItem {
                    text: segment.text(),
                    x,
                    y: line.baseline,
                    width,
                    height: line.ascent,
                    descent: line.descent,
                    font_name,
                    font_size,
                    transform: [font_size, 0.0, 0.0, font_size, x, line.baseline],
                    page,
                    direction: TextDirection::Ltr,
                });
            }
            debug!(page, items = items.len(), "collected text segments");
            Ok(items)
        })
    }
}

impl TextMeasure for PdfiumDocument {
    /// Sets `text` in a detached pdfium text object and reads its width.
    /// Read-only documents, which must not gain font resources, and pdfium
    /// failures fall back to the base-font width table.
    fn measure_text(&self, text: &str, font: &str, size: f32) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        if self.info.read_only {
            return metrics::measure(text, font, size);
        }
        let standard = metrics::standard_font(font);
        let measured = self.with_document(|document| {
            let token = builtin_font(document, standard);
            let object = PdfPageTextObject::new(document, text, token, PdfPoints::new(size))
                .context("failed to create text object")?;
            Ok(object.width().context("failed to measure text object")?.value)
        });
        match measured {
            Ok(width) if width > 0.0 => width,
            Ok(_) => metrics::measure(text, font, size),
            Err(err) => {
                debug!(error = %err, "falling back to width table");
                metrics::measure(text, font, size)
            }
        }
    }
}

impl DocumentWriter for PdfiumDocument {
    fn check_text(&self, page: usize, _text: &DrawText) -> Result<(), WriterError> {
        self.ensure_writable()?;
        self.with_document(|document| {
            document
                .pages()
                .get(page_index(page)?)
                .with_context(|| format!("page {} out of range", page))?;
            Ok(())
        })?;
        Ok(())
    }

    fn erase_region(&self, page: usize, rect: Rect, background: Color) -> Result<(), WriterError> {
        self.edit_page(page, |pdf_page| {
            pdf_page
                .objects_mut()
                .create_path_object_rect(
                    PdfRect::new_from_values(rect.bottom(), rect.left(), rect.top(), rect.right()),
                    None,
                    None,
                    Some(pdf_color(background)),
                )
                .with_context(|| format!("failed to cover region on page {}", page))?;
            Ok(())
        })
    }

    fn draw_text(&self, page: usize, text: &DrawText) -> Result<(), WriterError> {
        self.ensure_writable()?;
        let font = self.with_document(|document| Ok(builtin_font(document, text.font)))?;
        self.edit_page(page, |pdf_page| {
            let mut object = pdf_page
                .objects_mut()
                .create_text_object(
                    PdfPoints::new(text.origin.x),
                    PdfPoints::new(text.origin.y),
                    &text.text,
                    font,
                    PdfPoints::new(text.size),
                )
                .with_context(|| format!("failed to set text on page {}", page))?;
            object
                .set_fill_color(pdf_color(text.color))
                .context("failed to colour text object")?;
            Ok(())
        })
    }

    fn stroke_line(
        &self,
        page: usize,
        from: Point,
        to: Point,
        width: f32,
        color: Color,
    ) -> Result<(), WriterError> {
        self.edit_page(page, |pdf_page| {
            pdf_page
                .objects_mut()
                .create_path_object_line(
                    PdfPoints::new(from.x),
                    PdfPoints::new(from.y),
                    PdfPoints::new(to.x),
                    PdfPoints::new(to.y),
                    pdf_color(color),
                    PdfPoints::new(width),
                )
                .with_context(|| format!("failed to stroke line on page {}", page))?;
            Ok(())
        })
    }

    fn serialize(&self) -> Result<Vec<u8>, WriterError> {
        let bytes = self.with_document(|document| {
            document
                .save_to_bytes()
                .context("failed to serialize document")
        })?;
        Ok(bytes)
    }
}

struct VerticalExtent {
    baseline: f32,
    ascent: f32,
    descent: f32,
}

/// Splits a segment box at the baseline. Without a glyph origin the box
/// bottom stands in for the baseline.
fn vertical_extent(bottom: f32, top: f32, origin_y: Option<f32>) -> VerticalExtent {
    let baseline = origin_y
        .filter(|y| (bottom..=top).contains(y))
        .unwrap_or(bottom);
    VerticalExtent {
        baseline,
        ascent: top - baseline,
        descent: baseline - bottom,
    }
}

fn page_index(page: usize) -> Result<PdfPageIndex> {
    PdfPageIndex::try_from(page).map_err(|_| anyhow!("page {} is out of supported range", page))
}

fn pdf_color(color: Color) -> PdfColor {
    PdfColor::new(color.r, color.g, color.b, color.a)
}

fn builtin_font(document: &mut PdfDocument<'_>, font: StandardFont) -> PdfFontToken {
    let fonts = document.fonts_mut();
    match font {
        StandardFont::Helvetica => fonts.helvetica(),
        StandardFont::HelveticaBold => fonts.helvetica_bold(),
        StandardFont::HelveticaOblique => fonts.helvetica_oblique(),
        StandardFont::HelveticaBoldOblique => fonts.helvetica_bold_oblique(),
        StandardFont::TimesRoman => fonts.times_roman(),
        StandardFont::TimesBold => fonts.times_bold(),
        StandardFont::TimesItalic => fonts.times_italic(),
        StandardFont::TimesBoldItalic => fonts.times_bold_italic(),
        StandardFont::Courier => fonts.courier(),
        StandardFont::CourierBold => fonts.courier_bold(),
        StandardFont::CourierOblique => fonts.courier_oblique(),
        StandardFont::CourierBoldOblique => fonts.courier_bold_oblique(),
        StandardFont::Symbol => fonts.symbol(),
        StandardFont::ZapfDingbats => fonts.zapf_dingbats(),
    }
}

fn build_document_info(document: &PdfDocument<'_>, path: &Path) -> DocumentInfo {
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| t.value().split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or_else(Vec::new);
    let read_only = matches!(
        document.permissions().can_modify_document_content(),
        Ok(false)
    );

    DocumentInfo {
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
        read_only,
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(PDFIUM_LIBRARY_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}={}: {}", PDFIUM_LIBRARY_ENV, path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
