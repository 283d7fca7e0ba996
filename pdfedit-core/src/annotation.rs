//! User marks composited over a page at render time. The layer is owned by
//! the caller; the core only reads it (cache validity) and rewrites the
//! overlay pairs it created itself.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Color, Point, Rect};
use crate::runs::RunId;
use crate::style::{FontSlant, FontWeight, TextAlign, TextDecoration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(Uuid);

impl AnnotationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    Rectangle {
        rect: Rect,
        fill: Option<Color>,
        stroke: Option<Color>,
    },
    Ellipse {
        rect: Rect,
        fill: Option<Color>,
        stroke: Option<Color>,
    },
    Line {
        from: Point,
        to: Point,
        stroke: Color,
        width: f32,
    },
    Text {
        /// Baseline anchor.
        origin: Point,
        text: String,
        font_family: String,
        font_size: f32,
        color: Color,
        weight: FontWeight,
        slant: FontSlant,
        decoration: TextDecoration,
        align: TextAlign,
        width: f32,
    },
    Stamp {
        rect: Rect,
        label: String,
        color: Color,
    },
}

impl AnnotationKind {
    pub fn bounds(&self) -> Rect {
        match self {
            AnnotationKind::Rectangle { rect, .. }
            | AnnotationKind::Ellipse { rect, .. }
            | AnnotationKind::Stamp { rect, .. } => *rect,
            AnnotationKind::Line { from, to, .. } => Rect::new(
                from.x.min(to.x),
                from.y.min(to.y),
                (from.x - to.x).abs(),
                (from.y - to.y).abs(),
            ),
            AnnotationKind::Text {
                origin,
                font_size,
                width,
                ..
            } => Rect::new(origin.x, origin.y, *width, *font_size),
        }
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        match self {
            AnnotationKind::Rectangle { rect, .. }
            | AnnotationKind::Ellipse { rect, .. }
            | AnnotationKind::Stamp { rect, .. } => *rect = rect.translate(dx, dy),
            AnnotationKind::Line { from, to, .. } => {
                *from = Point::new(from.x + dx, from.y + dy);
                *to = Point::new(to.x + dx, to.y + dy);
            }
            AnnotationKind::Text { origin, .. } => {
                *origin = Point::new(origin.x + dx, origin.y + dy);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub page: usize,
    pub kind: AnnotationKind,
    pub z_index: i32,
    /// Set on overlay pairs produced by a text edit of this run.
    pub source_run: Option<RunId>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Annotation {
    pub fn new(page: usize, kind: AnnotationKind) -> Self {
        Self {
            id: AnnotationId::new(),
            page,
            kind,
            z_index: 0,
            source_run: None,
            created_at: now_millis(),
        }
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn tagged(mut self, run: RunId) -> Self {
        self.source_run = Some(run);
        self
    }

    pub fn bounds(&self) -> Rect {
        self.kind.bounds()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationLayer {
    items: Vec<Annotation>,
}

impl AnnotationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, annotation: Annotation) -> AnnotationId {
        let id = annotation.id;
        self.items.push(annotation);
        id
    }

    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let idx = self.items.iter().position(|a| a.id == id)?;
        Some(self.items.remove(idx))
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.items.iter().find(|a| a.id == id)
    }

    /// Returns `false` when the annotation does not exist.
    pub fn move_by(&mut self, id: AnnotationId, dx: f32, dy: f32) -> bool {
        match self.items.iter_mut().find(|a| a.id == id) {
            Some(annotation) => {
                annotation.kind.translate(dx, dy);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Annotations of `page` in compositing order (lowest z first, insertion
    /// order among equals).
    pub fn for_page(&self, page: usize) -> Vec<&Annotation> {
        let mut out: Vec<_> = self.items.iter().filter(|a| a.page == page).collect();
        out.sort_by_key(|a| a.z_index);
        out
    }

    pub fn has_pending(&self, page: usize) -> bool {
        self.items.iter().any(|a| a.page == page)
    }

    pub fn overlays_for_run(&self, page: usize, run: &RunId) -> Vec<&Annotation> {
        self.items
            .iter()
            .filter(|a| a.page == page && a.source_run.as_ref() == Some(run))
            .collect()
    }

    /// Drops every overlay previously generated for `run` and returns them.
    pub fn remove_overlays_for_run(&mut self, page: usize, run: &RunId) -> Vec<Annotation> {
        let (removed, kept) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|a| a.page == page && a.source_run.as_ref() == Some(run));
        self.items = kept;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_annotation(page: usize, z: i32) -> Annotation {
        Annotation::new(
            page,
            AnnotationKind::Rectangle {
                rect: Rect::new(0.0, 0.0, 10.0, 10.0),
                fill: Some(Color::WHITE),
                stroke: None,
            },
        )
        .with_z_index(z)
    }

    #[test]
    fn layer_orders_page_annotations_by_z_index() {
        let mut layer = AnnotationLayer::new();
        let top = layer.add(rect_annotation(1, 10));
        let bottom = layer.add(rect_annotation(1, -1));
        layer.add(rect_annotation(2, 0));

        let ids: Vec<_> = layer.for_page(1).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![bottom, top]);
        assert!(layer.has_pending(2));
        assert!(!layer.has_pending(3));
    }

    #[test]
    fn move_and_remove() {
        let mut layer = AnnotationLayer::new();
        let id = layer.add(rect_annotation(0, 0));
        assert!(layer.move_by(id, 5.0, -2.0));
        assert_eq!(layer.get(id).unwrap().bounds(), Rect::new(5.0, -2.0, 10.0, 10.0));

        assert!(layer.remove(id).is_some());
        assert!(layer.remove(id).is_none());
        assert!(!layer.move_by(id, 1.0, 1.0));
    }

    #[test]
    fn run_overlays_are_replaceable() {
        let run = RunId::new("run-0-2");
        let mut layer = AnnotationLayer::new();
        layer.add(rect_annotation(0, 1000).tagged(run.clone()));
        layer.add(rect_annotation(0, 1001).tagged(run.clone()));
        layer.add(rect_annotation(0, 0));
        layer.add(rect_annotation(1, 0).tagged(run.clone()));

        assert_eq!(layer.overlays_for_run(0, &run).len(), 2);
        let removed = layer.remove_overlays_for_run(0, &run);
        assert_eq!(removed.len(), 2);
        assert_eq!(layer.len(), 2);
        assert!(layer.overlays_for_run(0, &run).is_empty());
    }

    #[test]
    fn annotations_serialize_with_type_tag() {
        let annotation = rect_annotation(4, 0);
        let json = serde_json::to_value(&annotation).unwrap();
        assert_eq!(json["kind"]["type"], "rectangle");
        assert_eq!(json["kind"]["fill"], "#ffffff");
        let back: Annotation = serde_json::from_value(json).unwrap();
        assert_eq!(back, annotation);
    }
}
