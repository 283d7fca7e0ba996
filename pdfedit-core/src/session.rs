use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::annotation::AnnotationLayer;
use crate::cache::RenderCache;
use crate::commit::{CommitOptions, CommitReport, EditCommitter, RunEdit};
use crate::config::EditorConfig;
use crate::error::EditError;
use crate::geometry::{CoordinateMapper, Point, ScreenRect, ViewportDescriptor};
use crate::history::{BranchId, EditRecord, HistoryManager, HistoryStep, MergeStrategy};
use crate::hit_test::HitTester;
use crate::runs::{find_text, PageRuns, RunExtractor, RunId, RunMatch, TextSelection};
use crate::{DocumentBackend, DocumentInfo, DocumentProvider, RenderImage};

/// Run and caret position under a pointer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextHit {
    pub run_id: RunId,
    pub char_index: usize,
    /// The pointer in document space.
    pub point: Point,
}

/// One open document plus everything derived from it: per-page viewports
/// and runs, the edit history and the render cache. Annotations stay with
/// the caller and are passed in where needed.
pub struct EditorSession {
    backend: Arc<dyn DocumentBackend>,
    config: EditorConfig,
    viewports: Mutex<HashMap<usize, ViewportDescriptor>>,
    runs: HashMap<usize, PageRuns>,
    history: HistoryManager,
    render_cache: Mutex<RenderCache>,
}

impl EditorSession {
    pub fn new(backend: Arc<dyn DocumentBackend>, config: EditorConfig) -> Self {
        let history = HistoryManager::new(config.history_max_records, config.history_max_branches);
        let render_cache = RenderCache::new(config.cache_capacity, config.cache_expiry);
        Self {
            backend,
            config,
            viewports: Mutex::new(HashMap::new()),
            runs: HashMap::new(),
            history,
            render_cache: Mutex::new(render_cache),
        }
    }

    #[instrument(skip(provider, config))]
    pub async fn open_with<P>(provider: &P, path: &Path, config: EditorConfig) -> Result<Self>
    where
        P: DocumentProvider + ?Sized,
    {
        let backend = provider.open(path).await?;
        info!(pages = backend.info().page_count, "document opened");
        Ok(Self::new(backend, config))
    }

    pub fn info(&self) -> &DocumentInfo {
        self.backend.info()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    fn check_page(&self, page: usize) -> Result<(), EditError> {
        if page >= self.info().page_count {
            return Err(EditError::NotFound {
                what: "page",
                id: page.to_string(),
            });
        }
        Ok(())
    }

    /// Computes and remembers the viewport of `page` at `scale`.
    pub fn prepare_viewport(&self, page: usize, scale: f32) -> Result<ViewportDescriptor, EditError> {
        self.check_page(page)?;
        let (width, height) = self.backend.page_size(page)?;
        let viewport = ViewportDescriptor::for_page(width, height, scale);
        self.viewports.lock().insert(page, viewport);
        Ok(viewport)
    }

    /// Page bitmap without annotations. Served from the cache unless the
    /// page has annotations.
    #[instrument(skip(self, annotations))]
    pub fn render_page(
        &self,
        page: usize,
        scale: f32,
        annotations: &AnnotationLayer,
    ) -> Result<RenderImage, EditError> {
        let viewport = self.prepare_viewport(page, scale)?;
        if !annotations.has_pending(page) {
            if let Some(image) = self.render_cache.lock().get(page, scale) {
                debug!(page, "render cache hit");
                return Ok(image);
            }
        }
        let image = self.backend.render(page, &viewport)?;
        self.render_cache
            .lock()
            .put_if_clean(page, scale, image.clone(), annotations);
        Ok(image)
    }

    /// Re-derives the runs of `page` from the backend, discarding in-memory
    /// updates made by earlier commits.
    #[instrument(skip(self))]
    pub fn extract_runs(&mut self, page: usize) -> Result<&PageRuns, EditError> {
        self.check_page(page)?;
        let items = self.backend.glyph_items(page)?;
        let runs = RunExtractor::new(self.config.line_threshold).extract(page, &items);
        debug!(page, items = items.len(), runs = runs.len(), "extracted text runs");
        self.runs.insert(page, PageRuns::new(page, runs));
        self.runs
            .get(&page)
            .ok_or_else(|| EditError::InvalidState(format!("runs of page {page} vanished")))
    }

    fn ensure_runs(&mut self, page: usize) -> Result<(), EditError> {
        if !self.runs.contains_key(&page) {
            self.extract_runs(page)?;
        }
        Ok(())
    }

    pub fn runs(&self, page: usize) -> Option<&PageRuns> {
        self.runs.get(&page)
    }

    pub fn mapper(&self, page: usize) -> CoordinateMapper {
        CoordinateMapper::new(self.viewports.lock().get(&page).copied())
    }

    /// Maps a pointer position to a run and character. `None` while the page
    /// has no viewport or no runs, or when nothing is near the pointer.
    pub fn hit_test(
        &self,
        page: usize,
        screen_point: Point,
        screen: Option<ScreenRect>,
    ) -> Option<TextHit> {
        let mut mapper = self.mapper(page);
        if let Some(screen) = screen {
            mapper = mapper.with_screen(screen);
        }
        if !mapper.is_ready() {
            return None;
        }
        let runs = self.runs.get(&page)?;
        let point = mapper.to_document(screen_point);
        let tester = HitTester::new(self.config.hit_tolerance);
        let run = tester.find_run(point, runs.runs())?;
        Some(TextHit {
            run_id: run.id.clone(),
            char_index: tester.find_char_index(point.x, run, &*self.backend),
            point,
        })
    }

    pub fn selected_text(&self, page: usize, selection: &TextSelection) -> Option<String> {
        selection.resolve(self.runs.get(&page)?)
    }

    /// Searches every page whose runs have been extracted, in page order.
    pub fn find(&self, query: &str, case_sensitive: bool) -> Vec<RunMatch> {
        let mut pages: Vec<&PageRuns> = self.runs.values().collect();
        pages.sort_by_key(|runs| runs.page());
        find_text(pages.into_iter().flat_map(|runs| runs.iter()), query, case_sensitive)
    }

    pub fn commit(
        &mut self,
        page: usize,
        edits: &[RunEdit],
        annotations: &mut AnnotationLayer,
    ) -> Result<CommitReport, EditError> {
        let options = self.config.commit_options();
        self.commit_with_options(page, edits, annotations, options)
    }

    #[instrument(skip(self, edits, annotations), fields(edits = edits.len()))]
    pub fn commit_with_options(
        &mut self,
        page: usize,
        edits: &[RunEdit],
        annotations: &mut AnnotationLayer,
        options: CommitOptions,
    ) -> Result<CommitReport, EditError> {
        self.check_page(page)?;
        self.ensure_runs(page)?;
        let runs = self
            .runs
            .get_mut(&page)
            .ok_or_else(|| EditError::InvalidState(format!("runs of page {page} vanished")))?;

        let backend = Arc::clone(&self.backend);
        let committer = EditCommitter::new(&*backend, &*backend, options);
        let report = committer.commit(runs, edits, annotations, &mut self.history);

        if report.committed() > 0 {
            self.render_cache.lock().invalidate(page);
        }
        info!(
            page,
            committed = report.committed(),
            failed = report.outcomes.len() - report.committed(),
            "commit finished"
        );
        Ok(report)
    }

    /// Logs an edit the caller already applied (annotation add, move, page
    /// rotation, ...).
    pub fn record(&mut self, record: EditRecord) {
        self.render_cache.lock().invalidate(record.page());
        self.history.push(record);
    }

    /// Applies the inverse of the last record. The cursor only moves once
    /// the inverse has been applied, so a failed undo can be retried.
    #[instrument(skip(self, annotations))]
    pub fn undo(&mut self, annotations: &mut AnnotationLayer) -> Result<HistoryStep, EditError> {
        if let Some(inverse) = self.history.peek_undo() {
            self.apply_record(&inverse, annotations)?;
        }
        Ok(self.history.undo())
    }

    #[instrument(skip(self, annotations))]
    pub fn redo(&mut self, annotations: &mut AnnotationLayer) -> Result<HistoryStep, EditError> {
        if let Some(record) = self.history.peek_redo().cloned() {
            self.apply_record(&record, annotations)?;
        }
        Ok(self.history.redo())
    }

    /// Materialises `record` against runs, annotations and the document.
    /// Page-level records are left to the caller.
    pub fn apply_record(
        &mut self,
        record: &EditRecord,
        annotations: &mut AnnotationLayer,
    ) -> Result<(), EditError> {
        match record {
            EditRecord::ReplaceRunText {
                page,
                run_id,
                after,
                tier,
                overlay,
                ..
            } => {
                self.ensure_runs(*page)?;
                let runs = self
                    .runs
                    .get_mut(page)
                    .ok_or_else(|| EditError::run_not_found(run_id.as_str()))?;
                let backend = Arc::clone(&self.backend);
                EditCommitter::new(&*backend, &*backend, self.config.commit_options())
                    .replay_run_text(runs, run_id, *tier, after, overlay, annotations)?;
            }
            EditRecord::AddAnnotation { annotation } => {
                if annotations.get(annotation.id).is_none() {
                    annotations.add(annotation.clone());
                }
            }
            EditRecord::RemoveAnnotation { annotation } => {
                annotations.remove(annotation.id);
            }
            EditRecord::MoveAnnotation { id, dx, dy, .. } => {
                if !annotations.move_by(*id, *dx, *dy) {
                    return Err(EditError::NotFound {
                        what: "annotation",
                        id: id.to_string(),
                    });
                }
            }
            EditRecord::RotatePage { .. }
            | EditRecord::InsertPage { .. }
            | EditRecord::DeletePage { .. } => {
                debug!(page = record.page(), "page-level record left to the caller");
            }
        }
        self.render_cache.lock().invalidate(record.page());
        Ok(())
    }

    pub fn create_branch(&mut self, name: impl Into<String>) -> BranchId {
        self.history.create_branch(name)
    }

    /// Makes `id` current and returns its applied records, oldest first, for
    /// the caller to replay.
    pub fn switch_branch(&mut self, id: BranchId) -> Result<Vec<EditRecord>, EditError> {
        let records = self.history.switch_branch(id)?.to_vec();
        self.render_cache.lock().clear();
        Ok(records)
    }

    /// Merges history branches; see [`HistoryManager::merge_branch`]. Returns
    /// the target's applied records for the caller to replay.
    pub fn merge_branch(
        &mut self,
        source: BranchId,
        target: BranchId,
        strategy: MergeStrategy,
    ) -> Result<Vec<EditRecord>, EditError> {
        let records = self.history.merge_branch(source, target, strategy)?.to_vec();
        if target == self.history.current().id() {
            self.render_cache.lock().clear();
        }
        Ok(records)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        info!("history cleared");
    }

    /// Serialized document with every content rewrite applied.
    pub fn save(&self) -> Result<Vec<u8>, EditError> {
        Ok(self.backend.serialize()?)
    }
}
