//! Writes run edits back into the document.
//!
//! Each edit first tries to rewrite the page content (erase the old run box,
//! set the new text in a standard font). When the writer refuses, the edit
//! is rendered as an overlay pair instead: a background-coloured cover over
//! the old text and a text annotation on top. Edits in a batch succeed or
//! fail individually.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::annotation::{Annotation, AnnotationKind, AnnotationLayer};
use crate::error::{EditError, WriterError};
use crate::geometry::{Color, Point, Rect};
use crate::history::{EditRecord, HistoryManager, OverlayChange, RunContent};
use crate::runs::{PageRuns, RunId, TextRun};
use crate::style::{StandardFont, TextAlign, TextDecoration, TextFormat};
use crate::{DocumentWriter, DrawText, TextMeasure};

pub const DEFAULT_COVER_PADDING: f32 = 3.0;
pub const COVER_Z_INDEX: i32 = 1000;
pub const TEXT_Z_INDEX: i32 = 1001;
const UNDERLINE_OFFSET: f32 = 2.0;
const UNDERLINE_WIDTH: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitTier {
    ContentRewrite,
    Overlay,
}

/// Replacement text for one run plus optional formatting overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEdit {
    pub run_id: RunId,
    pub new_text: String,
    #[serde(default)]
    pub format: TextFormat,
}

impl RunEdit {
    pub fn new(run_id: impl Into<RunId>, new_text: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            new_text: new_text.into(),
            format: TextFormat::default(),
        }
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }
}

#[derive(Debug)]
pub enum EditStatus {
    Committed {
        tier: CommitTier,
        /// Why the content rewrite was abandoned, if it was.
        fallback: Option<EditError>,
    },
    Failed(EditError),
}

#[derive(Debug)]
pub struct EditOutcome {
    pub run_id: RunId,
    pub status: EditStatus,
}

impl EditOutcome {
    pub fn tier(&self) -> Option<CommitTier> {
        match &self.status {
            EditStatus::Committed { tier, .. } => Some(*tier),
            EditStatus::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&EditError> {
        match &self.status {
            EditStatus::Committed { fallback, .. } => fallback.as_ref(),
            EditStatus::Failed(err) => Some(err),
        }
    }
}

#[derive(Debug)]
pub struct CommitReport {
    pub page: usize,
    pub outcomes: Vec<EditOutcome>,
}

impl CommitReport {
    pub fn all_committed(&self) -> bool {
        self.outcomes.iter().all(|o| o.tier().is_some())
    }

    pub fn committed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.tier().is_some()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&RunId, &EditError)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            EditStatus::Failed(err) => Some((&o.run_id, err)),
            EditStatus::Committed { .. } => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommitOptions {
    pub padding: f32,
    pub background: Color,
    /// Skip the content rewrite and go straight to overlays.
    pub overlay_only: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            padding: DEFAULT_COVER_PADDING,
            background: Color::WHITE,
            overlay_only: false,
        }
    }
}

pub struct EditCommitter<'a, W: ?Sized, M: ?Sized> {
    writer: &'a W,
    measure: &'a M,
    options: CommitOptions,
}

impl<'a, W, M> EditCommitter<'a, W, M>
where
    W: DocumentWriter + ?Sized,
    M: TextMeasure + ?Sized,
{
    pub fn new(writer: &'a W, measure: &'a M, options: CommitOptions) -> Self {
        Self {
            writer,
            measure,
            options,
        }
    }

    /// Applies `edits` to the runs of one page. Successful edits update the
    /// run in place and push one history record each.
    #[instrument(skip_all, fields(page = runs.page(), edits = edits.len()))]
    pub fn commit(
        &self,
        runs: &mut PageRuns,
        edits: &[RunEdit],
        annotations: &mut AnnotationLayer,
        history: &mut HistoryManager,
    ) -> CommitReport {
        let page = runs.page();
        let mut outcomes = Vec::with_capacity(edits.len());
        for edit in edits {
            let status = match self.commit_one(runs, edit, annotations) {
                Ok((record, tier, fallback)) => {
                    history.push(record);
                    EditStatus::Committed { tier, fallback }
                }
                Err(err) => {
                    warn!(page, run = %edit.run_id, error = %err, "edit rejected");
                    EditStatus::Failed(err)
                }
            };
            outcomes.push(EditOutcome {
                run_id: edit.run_id.clone(),
                status,
            });
        }
        CommitReport { page, outcomes }
    }

    fn commit_one(
        &self,
        runs: &mut PageRuns,
        edit: &RunEdit,
        annotations: &mut AnnotationLayer,
    ) -> Result<(EditRecord, CommitTier, Option<EditError>), EditError> {
        let page = runs.page();
        let run = runs
            .get_mut(&edit.run_id)
            .ok_or_else(|| EditError::run_not_found(edit.run_id.as_str()))?;

        let text = sanitize(&edit.new_text);
        if text.trim().is_empty() {
            return Err(EditError::InvalidState(
                "replacement text is empty".to_owned(),
            ));
        }

        let before = RunContent::from(&*run);
        let laid_out = self.layout(run, text, &edit.format);

        let fallback = if self.options.overlay_only {
            None
        } else {
            match self.rewrite(page, run, &laid_out) {
                Ok(()) => {
                    let removed = annotations.remove_overlays_for_run(page, &run.id);
                    apply_content(run, &laid_out);
                    debug!(page, run = %run.id, "run rewritten in page content");
                    let record = EditRecord::ReplaceRunText {
                        page,
                        run_id: run.id.clone(),
                        before,
                        after: laid_out,
                        tier: CommitTier::ContentRewrite,
                        overlay: OverlayChange {
                            added: Vec::new(),
                            removed,
                        },
                    };
                    return Ok((record, CommitTier::ContentRewrite, None));
                }
                Err(failure) => {
                    warn!(
                        page,
                        run = %run.id,
                        tier = "content_rewrite",
                        error = %failure.error,
                        erased = failure.erased,
                        "content rewrite failed; falling back to overlay"
                    );
                    Some(failure)
                }
            }
        };

        // The old text is gone from the page, so undo has to bring it back
        // as an overlay of its own.
        let restore = fallback
            .as_ref()
            .filter(|failure| failure.erased)
            .map(|_| self.overlay_pair(page, run, &before));
        let mut overlay = self.overlay(page, run, &laid_out, annotations);
        if let Some(pair) = restore {
            if overlay.removed.is_empty() {
                overlay.removed.extend(pair);
            }
        }
        // The original glyphs stay in the page, so the run keeps covering them.
        let after = covering(run, &laid_out);
        apply_content(run, &after);

        let record = EditRecord::ReplaceRunText {
            page,
            run_id: run.id.clone(),
            before,
            after,
            tier: CommitTier::Overlay,
            overlay,
        };
        Ok((record, CommitTier::Overlay, fallback.map(|failure| failure.error)))
    }

    /// Re-applies one side of a recorded run edit, for undo and redo. A
    /// content rewrite the writer refuses is shown as an overlay instead, so
    /// only a missing run fails the replay.
    pub fn replay_run_text(
        &self,
        runs: &mut PageRuns,
        run_id: &RunId,
        tier: CommitTier,
        content: &RunContent,
        overlay: &OverlayChange,
        annotations: &mut AnnotationLayer,
    ) -> Result<(), EditError> {
        let page = runs.page();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| EditError::run_not_found(run_id.as_str()))?;

        if tier == CommitTier::ContentRewrite {
            if let Err(failure) = self.rewrite(page, run, content) {
                warn!(
                    page,
                    run = %run.id,
                    tier = "content_rewrite",
                    error = %failure.error,
                    "replay falling back to overlay"
                );
                annotations.remove_overlays_for_run(page, run_id);
                for annotation in self.overlay_pair(page, run, content) {
                    annotations.add(annotation);
                }
                let covered = covering(run, content);
                apply_content(run, &covered);
                return Ok(());
            }
        }
        annotations.remove_overlays_for_run(page, run_id);
        for restored in &overlay.added {
            if annotations.get(restored.id).is_none() {
                annotations.add(restored.clone());
            }
        }
        apply_content(run, content);
        Ok(())
    }

    fn layout(&self, run: &TextRun, text: String, format: &TextFormat) -> RunContent {
        let style = format.apply_to(&run.style);
        let font_name = format
            .font_family
            .clone()
            .unwrap_or_else(|| run.font_name.clone());
        let font_size = format
            .font_size
            .filter(|size| *size > 0.0)
            .unwrap_or(run.font_size);
        let font = StandardFont::resolve(
            &font_name,
            style.weight.unwrap_or_default(),
            style.slant.unwrap_or_default(),
        );
        let width = self
            .measure
            .measure_text(&text, font.postscript_name(), font_size);
        let x = match style.align.unwrap_or_default() {
            TextAlign::Left => run.x,
            TextAlign::Center => run.x + (run.width - width) / 2.0,
            TextAlign::Right => run.x + run.width - width,
        };
        RunContent {
            text,
            x,
            font_name,
            font_size,
            width,
            style,
        }
    }

    /// Replaces the run's text in the page content. Nothing is touched
    /// unless the writer accepts the new text up front; if drawing still
    /// fails after the erase, the old text is drawn back.
    fn rewrite(&self, page: usize, run: &TextRun, content: &RunContent) -> Result<(), RewriteFailure> {
        let draw = draw_request(content, run.y);
        self.writer
            .check_text(page, &draw)
            .map_err(RewriteFailure::untouched)?;
        self.erase(page, run).map_err(RewriteFailure::untouched)?;

        if let Err(err) = self.paint(page, &draw, content, run.y) {
            let previous = RunContent::from(run);
            let restored = self.erase(page, run).and_then(|()| {
                self.paint(page, &draw_request(&previous, run.y), &previous, run.y)
            });
            if let Err(restore_err) = &restored {
                warn!(page, run = %run.id, error = %restore_err, "could not redraw erased text");
            }
            return Err(RewriteFailure {
                error: err.into(),
                erased: restored.is_err(),
            });
        }
        Ok(())
    }

    fn erase(&self, page: usize, run: &TextRun) -> Result<(), WriterError> {
        self.writer.erase_region(
            page,
            run.bounds().inflate(self.options.padding),
            self.options.background,
        )
    }

    fn paint(
        &self,
        page: usize,
        draw: &DrawText,
        content: &RunContent,
        baseline: f32,
    ) -> Result<(), WriterError> {
        self.writer.draw_text(page, draw)?;
        if content.style.decoration == Some(TextDecoration::Underline) {
            let y = baseline - UNDERLINE_OFFSET;
            self.writer.stroke_line(
                page,
                Point::new(content.x, y),
                Point::new(content.x + content.width, y),
                UNDERLINE_WIDTH,
                draw.color,
            )?;
        }
        Ok(())
    }

    fn overlay(
        &self,
        page: usize,
        run: &TextRun,
        content: &RunContent,
        annotations: &mut AnnotationLayer,
    ) -> OverlayChange {
        let removed = annotations.remove_overlays_for_run(page, &run.id);
        let added = self.overlay_pair(page, run, content);
        for annotation in &added {
            annotations.add(annotation.clone());
        }
        OverlayChange {
            added: added.to_vec(),
            removed,
        }
    }

    /// Cover over the run and whatever `content` will occupy, plus the text
    /// annotation drawn on top of it.
    fn overlay_pair(&self, page: usize, run: &TextRun, content: &RunContent) -> [Annotation; 2] {
        let p = self.options.padding;
        let bounds = run.bounds();
        let left = bounds.left().min(content.x);
        let width = bounds.right().max(content.x + content.width) - left;
        let cover = Annotation::new(
            page,
            AnnotationKind::Rectangle {
                rect: Rect::new(left - p, bounds.y - p, width + 2.0 * p, bounds.height + 2.0 * p),
                fill: Some(self.options.background),
                stroke: None,
            },
        )
        .with_z_index(COVER_Z_INDEX)
        .tagged(run.id.clone());

        let style = &content.style;
        let text = Annotation::new(
            page,
            AnnotationKind::Text {
                origin: Point::new(content.x, run.y),
                text: content.text.clone(),
                font_family: content.font_name.clone(),
                font_size: content.font_size,
                color: style.color.unwrap_or(Color::BLACK),
                weight: style.weight.unwrap_or_default(),
                slant: style.slant.unwrap_or_default(),
                decoration: style.decoration.unwrap_or_default(),
                align: style.align.unwrap_or_default(),
                width: content.width,
            },
        )
        .with_z_index(TEXT_Z_INDEX)
        .tagged(run.id.clone());

        [cover, text]
    }
}

/// A content rewrite that did not go through.
struct RewriteFailure {
    error: EditError,
    /// The old text was painted over and could not be drawn back.
    erased: bool,
}

impl RewriteFailure {
    fn untouched(err: WriterError) -> Self {
        Self {
            error: err.into(),
            erased: false,
        }
    }
}

impl From<&TextRun> for RunContent {
    fn from(run: &TextRun) -> Self {
        RunContent {
            text: run.text.clone(),
            x: run.x,
            font_name: run.font_name.clone(),
            font_size: run.font_size,
            width: run.width,
            style: run.style,
        }
    }
}

fn apply_content(run: &mut TextRun, content: &RunContent) {
    run.text = content.text.clone();
    run.x = content.x;
    run.width = content.width;
    run.font_name = content.font_name.clone();
    run.font_size = content.font_size;
    run.style = content.style;
}

/// `content` widened to the run's current box, for overlays that leave the
/// old glyphs in the page.
fn covering(run: &TextRun, content: &RunContent) -> RunContent {
    let left = run.x.min(content.x);
    let right = run.bounds().right().max(content.x + content.width);
    RunContent {
        x: left,
        width: right - left,
        ..content.clone()
    }
}

fn draw_request(content: &RunContent, baseline: f32) -> DrawText {
    DrawText {
        text: content.text.clone(),
        origin: Point::new(content.x, baseline),
        family: content.font_name.clone(),
        font: standard_font(content),
        size: content.font_size,
        color: content.style.color.unwrap_or(Color::BLACK),
    }
}

fn standard_font(content: &RunContent) -> StandardFont {
    StandardFont::resolve(
        &content.font_name,
        content.style.weight.unwrap_or_default(),
        content.style.slant.unwrap_or_default(),
    )
}

/// Drops control characters; newlines and tabs have no meaning inside a run.
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit_test::tests::FixedWidth;
    use crate::runs::tests::item;
    use crate::runs::RunExtractor;
    use crate::style::{FontWeight, TextStyle};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Mode {
        Writable,
        ReadOnly,
        NoFonts,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Erase(Rect, Color),
        Draw(DrawText),
        Line(Point, Point),
    }

    struct RecordingWriter {
        mode: Mode,
        calls: Mutex<Vec<Call>>,
        /// Number of upcoming `draw_text` calls to reject.
        draw_failures: AtomicUsize,
    }

    impl RecordingWriter {
        fn new(mode: Mode) -> Self {
            Self {
                mode,
                calls: Mutex::new(Vec::new()),
                draw_failures: AtomicUsize::new(0),
            }
        }

        fn failing_draws(count: usize) -> Self {
            let writer = Self::new(Mode::Writable);
            writer.draw_failures.store(count, Ordering::SeqCst);
            writer
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl DocumentWriter for RecordingWriter {
        fn check_text(&self, _page: usize, text: &DrawText) -> Result<(), WriterError> {
            if self.mode == Mode::NoFonts {
                return Err(WriterError::FontUnavailable(text.family.clone()));
            }
            Ok(())
        }

        fn erase_region(&self, _page: usize, rect: Rect, background: Color) -> Result<(), WriterError> {
            if self.mode == Mode::ReadOnly {
                return Err(WriterError::DocumentReadOnly);
            }
            self.calls.lock().push(Call::Erase(rect, background));
            Ok(())
        }

        fn draw_text(&self, _page: usize, text: &DrawText) -> Result<(), WriterError> {
            let pending = self.draw_failures.load(Ordering::SeqCst);
            if pending > 0 {
                self.draw_failures.store(pending - 1, Ordering::SeqCst);
                return Err(WriterError::Backend(anyhow::anyhow!("text object rejected")));
            }
            self.calls.lock().push(Call::Draw(text.clone()));
            Ok(())
        }

        fn stroke_line(
            &self,
            _page: usize,
            from: Point,
            to: Point,
            _width: f32,
            _color: Color,
        ) -> Result<(), WriterError> {
            self.calls.lock().push(Call::Line(from, to));
            Ok(())
        }

        fn serialize(&self) -> Result<Vec<u8>, WriterError> {
            Ok(Vec::new())
        }
    }

    fn page_runs() -> PageRuns {
        let items = vec![
            item("Invoice", 50.0, 700.0, 42.0),
            item("Total due", 50.0, 680.0, 54.0),
        ];
        PageRuns::new(0, RunExtractor::default().extract(0, &items))
    }

    fn commit_with(
        writer: &RecordingWriter,
        options: CommitOptions,
        runs: &mut PageRuns,
        edits: &[RunEdit],
        layer: &mut AnnotationLayer,
        history: &mut HistoryManager,
    ) -> CommitReport {
        EditCommitter::new(writer, &FixedWidth, options).commit(runs, edits, layer, history)
    }

    #[test]
    fn writable_document_is_rewritten_in_place() {
        let writer = RecordingWriter::new(Mode::Writable);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();
        let old_bounds = runs.runs()[0].bounds();

        let report = commit_with(
            &writer,
            CommitOptions::default(),
            &mut runs,
            &[RunEdit::new("run-0-0", "Receipt")],
            &mut layer,
            &mut history,
        );

        assert!(report.all_committed());
        assert_eq!(report.outcomes[0].tier(), Some(CommitTier::ContentRewrite));
        assert!(report.outcomes[0].error().is_none());
        assert!(layer.is_empty());

        let calls = writer.calls();
        assert_eq!(calls[0], Call::Erase(old_bounds.inflate(3.0), Color::WHITE));
        match &calls[1] {
            Call::Draw(draw) => {
                assert_eq!(draw.text, "Receipt");
                assert_eq!(draw.origin, Point::new(50.0, 700.0));
                assert_eq!(draw.font, StandardFont::Helvetica);
                assert_eq!(draw.color, Color::BLACK);
            }
            other => panic!("expected draw, got {:?}", other),
        }

        let run = &runs.runs()[0];
        assert_eq!(run.text, "Receipt");
        assert_eq!(run.width, 7.0 * 6.0);
        assert!(history.can_undo());
    }

    #[test]
    fn text_is_set_on_the_baseline_and_erase_covers_descenders() {
        let writer = RecordingWriter::new(Mode::Writable);
        let mut glyph = item("Typography", 50.0, 700.0, 60.0);
        glyph.descent = 2.5;
        let mut runs = PageRuns::new(0, RunExtractor::default().extract(0, &[glyph]));
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();

        commit_with(
            &writer,
            CommitOptions::default(),
            &mut runs,
            &[RunEdit::new("run-0-0", "Layout")],
            &mut layer,
            &mut history,
        );

        let calls = writer.calls();
        assert_eq!(
            calls[0],
            Call::Erase(Rect::new(50.0, 697.5, 60.0, 14.5).inflate(3.0), Color::WHITE)
        );
        match &calls[1] {
            Call::Draw(draw) => assert_eq!(draw.origin, Point::new(50.0, 700.0)),
            other => panic!("expected draw, got {:?}", other),
        }
    }

    #[test]
    fn read_only_document_falls_back_to_overlay() {
        let writer = RecordingWriter::new(Mode::ReadOnly);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();
        let old_bounds = runs.runs()[1].bounds();

        let report = commit_with(
            &writer,
            CommitOptions::default(),
            &mut runs,
            &[RunEdit::new("run-0-1", "Balance outstanding")],
            &mut layer,
            &mut history,
        );

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.tier(), Some(CommitTier::Overlay));
        assert!(matches!(outcome.error(), Some(EditError::ReadOnly)));
        assert!(writer.calls().is_empty());

        let overlays = layer.overlays_for_run(0, &RunId::new("run-0-1"));
        assert_eq!(overlays.len(), 2);
        let cover = overlays.iter().find(|a| a.z_index == COVER_Z_INDEX).unwrap();
        let text = overlays.iter().find(|a| a.z_index == TEXT_Z_INDEX).unwrap();
        let cover_rect = cover.bounds();
        assert!(cover_rect.left() <= old_bounds.left() - 3.0);
        assert!(cover_rect.right() >= old_bounds.right() + 3.0);
        assert!(cover_rect.bottom() <= old_bounds.bottom() - 3.0);
        assert!(cover_rect.top() >= old_bounds.top() + 3.0);
        // the new text is wider than the old run and the cover spans it
        assert!(cover_rect.right() >= text.bounds().right());

        let run = runs.get(&RunId::new("run-0-1")).unwrap();
        assert_eq!(run.text, "Balance outstanding");
        assert!(run.width >= old_bounds.width);
    }

    #[test]
    fn missing_font_falls_back_with_unsupported() {
        let writer = RecordingWriter::new(Mode::NoFonts);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();

        let report = commit_with(
            &writer,
            CommitOptions::default(),
            &mut runs,
            &[RunEdit::new("run-0-0", "Quote")],
            &mut layer,
            &mut history,
        );

        assert_eq!(report.outcomes[0].tier(), Some(CommitTier::Overlay));
        assert!(matches!(
            report.outcomes[0].error(),
            Some(EditError::Unsupported(_))
        ));
        assert_eq!(layer.len(), 2);
        // the font is checked before anything is erased
        assert!(writer.calls().is_empty());
    }

    fn undo_last(
        committer: &EditCommitter<'_, RecordingWriter, FixedWidth>,
        runs: &mut PageRuns,
        layer: &mut AnnotationLayer,
        history: &HistoryManager,
    ) {
        let record = history.current().records().last().unwrap().inverse();
        let EditRecord::ReplaceRunText {
            run_id,
            tier,
            after,
            overlay,
            ..
        } = &record
        else {
            panic!("unexpected record {:?}", record);
        };
        committer
            .replay_run_text(runs, run_id, *tier, after, overlay, layer)
            .unwrap();
    }

    fn drawn_texts(calls: &[Call]) -> Vec<String> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Draw(draw) => Some(draw.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn failed_draw_after_erase_redraws_old_text() {
        let writer = RecordingWriter::failing_draws(1);
        let committer = EditCommitter::new(&writer, &FixedWidth, CommitOptions::default());
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();

        let report = committer.commit(
            &mut runs,
            &[RunEdit::new("run-0-0", "Quote")],
            &mut layer,
            &mut history,
        );
        assert_eq!(report.outcomes[0].tier(), Some(CommitTier::Overlay));
        assert!(matches!(report.outcomes[0].error(), Some(EditError::Backend(_))));
        let calls = writer.calls();
        assert!(matches!(calls[0], Call::Erase(..)));
        assert_eq!(drawn_texts(&calls), vec!["Invoice".to_owned()]);

        undo_last(&committer, &mut runs, &mut layer, &history);
        assert!(layer.is_empty());
        assert_eq!(runs.runs()[0].text, "Invoice");
    }

    #[test]
    fn unrecoverable_erase_is_undone_through_an_overlay() {
        let writer = RecordingWriter::failing_draws(2);
        let committer = EditCommitter::new(&writer, &FixedWidth, CommitOptions::default());
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();

        let report = committer.commit(
            &mut runs,
            &[RunEdit::new("run-0-0", "Quote")],
            &mut layer,
            &mut history,
        );
        assert_eq!(report.outcomes[0].tier(), Some(CommitTier::Overlay));
        assert!(drawn_texts(&writer.calls()).is_empty());
        assert_eq!(layer.len(), 2);

        undo_last(&committer, &mut runs, &mut layer, &history);
        assert_eq!(runs.runs()[0].text, "Invoice");
        // the erased box stays covered and shows the old text again
        let overlays = layer.overlays_for_run(0, &RunId::new("run-0-0"));
        assert_eq!(overlays.len(), 2);
        assert!(overlays.iter().any(|a| matches!(
            &a.kind,
            AnnotationKind::Text { text, .. } if text == "Invoice"
        )));
    }

    #[test]
    fn refused_replay_falls_back_to_overlay() {
        let writer = RecordingWriter::new(Mode::Writable);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();
        commit_with(
            &writer,
            CommitOptions::default(),
            &mut runs,
            &[RunEdit::new("run-0-0", "Receipt")],
            &mut layer,
            &mut history,
        );

        let locked = RecordingWriter::new(Mode::ReadOnly);
        let committer = EditCommitter::new(&locked, &FixedWidth, CommitOptions::default());
        undo_last(&committer, &mut runs, &mut layer, &history);

        assert_eq!(runs.runs()[0].text, "Invoice");
        let overlays = layer.overlays_for_run(0, &RunId::new("run-0-0"));
        assert_eq!(overlays.len(), 2);
        let cover = overlays.iter().find(|a| a.z_index == COVER_Z_INDEX).unwrap();
        assert!(cover.bounds().right() >= 50.0 + 42.0);
    }

    #[test]
    fn overlay_edits_replace_previous_overlay() {
        let writer = RecordingWriter::new(Mode::ReadOnly);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();

        for text in ["First", "Second"] {
            commit_with(
                &writer,
                CommitOptions::default(),
                &mut runs,
                &[RunEdit::new("run-0-0", text)],
                &mut layer,
                &mut history,
            );
        }

        assert_eq!(layer.len(), 2);
        match history.current().records().last().unwrap() {
            EditRecord::ReplaceRunText { overlay, before, .. } => {
                assert_eq!(overlay.removed.len(), 2);
                assert_eq!(overlay.added.len(), 2);
                assert_eq!(before.text, "First");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn batch_commits_each_edit_independently() {
        let writer = RecordingWriter::new(Mode::Writable);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();

        let report = commit_with(
            &writer,
            CommitOptions::default(),
            &mut runs,
            &[
                RunEdit::new("run-0-0", "Receipt"),
                RunEdit::new("run-0-9", "Ghost"),
                RunEdit::new("run-0-1", "\n\t"),
            ],
            &mut layer,
            &mut history,
        );

        assert!(!report.all_committed());
        assert_eq!(report.committed(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 2);
        assert!(failures[0].1.is_not_found());
        assert!(matches!(failures[1].1, EditError::InvalidState(_)));

        assert_eq!(history.current().records().len(), 1);
        assert_eq!(runs.runs()[1].text, "Total due");
    }

    #[test]
    fn overlay_only_never_touches_the_writer() {
        let writer = RecordingWriter::new(Mode::Writable);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();
        let options = CommitOptions {
            overlay_only: true,
            ..CommitOptions::default()
        };

        let report = commit_with(
            &writer,
            options,
            &mut runs,
            &[RunEdit::new("run-0-0", "Receipt")],
            &mut layer,
            &mut history,
        );

        assert_eq!(report.outcomes[0].tier(), Some(CommitTier::Overlay));
        assert!(report.outcomes[0].error().is_none());
        assert!(writer.calls().is_empty());
        assert_eq!(layer.len(), 2);
    }

    #[test]
    fn formatting_controls_font_alignment_and_underline() {
        let writer = RecordingWriter::new(Mode::Writable);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();
        let format = TextFormat {
            font_family: Some("Times New Roman".to_owned()),
            weight: Some(FontWeight::Bold),
            decoration: Some(TextDecoration::Underline),
            align: Some(TextAlign::Right),
            ..TextFormat::default()
        };

        commit_with(
            &writer,
            CommitOptions::default(),
            &mut runs,
            &[RunEdit::new("run-0-1", "Due").with_format(format)],
            &mut layer,
            &mut history,
        );

        let calls = writer.calls();
        let new_width = 3.0 * 6.0;
        let expected_x = 50.0 + 54.0 - new_width;
        match &calls[1] {
            Call::Draw(draw) => {
                assert_eq!(draw.font, StandardFont::TimesBold);
                assert_eq!(draw.origin.x, expected_x);
            }
            other => panic!("expected draw, got {:?}", other),
        }
        assert_eq!(
            calls[2],
            Call::Line(
                Point::new(expected_x, 678.0),
                Point::new(expected_x + new_width, 678.0)
            )
        );

        let run = &runs.runs()[1];
        assert_eq!(run.font_name, "Times New Roman");
        assert_eq!(
            run.style,
            TextStyle {
                weight: Some(FontWeight::Bold),
                decoration: Some(TextDecoration::Underline),
                align: Some(TextAlign::Right),
                ..run.style
            }
        );
    }

    #[test]
    fn replaying_the_inverse_restores_run_and_overlays() {
        let writer = RecordingWriter::new(Mode::ReadOnly);
        let mut runs = page_runs();
        let mut layer = AnnotationLayer::new();
        let mut history = HistoryManager::default();
        let committer = EditCommitter::new(&writer, &FixedWidth, CommitOptions::default());

        committer.commit(
            &mut runs,
            &[RunEdit::new("run-0-0", "Receipt")],
            &mut layer,
            &mut history,
        );
        let record = history.current().records()[0].inverse();
        let EditRecord::ReplaceRunText {
            run_id,
            tier,
            after,
            overlay,
            ..
        } = &record
        else {
            panic!("unexpected record {:?}", record);
        };

        committer
            .replay_run_text(&mut runs, run_id, *tier, after, overlay, &mut layer)
            .unwrap();
        assert!(layer.is_empty());
        assert_eq!(runs.runs()[0].text, "Invoice");
        assert_eq!(runs.runs()[0].width, 42.0);
    }

    #[test]
    fn sanitize_drops_control_characters() {
        assert_eq!(sanitize("a\u{7}b\nc\td"), "abcd");
        assert_eq!(sanitize("plain"), "plain");
    }
}
