//! Grouping positioned glyph items into addressable text runs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::style::TextStyle;

pub const DEFAULT_LINE_THRESHOLD: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
    Ttb,
}

/// A piece of text as the rasterizer positions it, in document space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedGlyphItem {
    pub text: String,
    pub x: f32,
    /// Baseline.
    pub y: f32,
    pub width: f32,
    /// Extent above the baseline.
    pub height: f32,
    /// Extent below the baseline.
    #[serde(default)]
    pub descent: f32,
    pub font_name: String,
    pub font_size: f32,
    pub transform: [f32; 6],
    pub page: usize,
    pub direction: TextDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    fn for_ordinal(page: usize, ordinal: usize) -> Self {
        Self(format!("run-{page}-{ordinal}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One line of text on a page. Runs are derived data and are recomputed on
/// every extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub id: RunId,
    pub text: String,
    pub x: f32,
    /// Baseline of the first glyph item.
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub descent: f32,
    pub font_size: f32,
    pub font_name: String,
    pub page: usize,
    /// Index of the first glyph item subsumed by this run.
    pub start_index: usize,
    /// Index of the last glyph item subsumed by this run (inclusive).
    pub end_index: usize,
    pub style: TextStyle,
}

impl TextRun {
    /// Box from the descender line up to the top of the first item.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            self.x,
            self.y - self.descent,
            self.width,
            self.height + self.descent,
        )
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunExtractor {
    line_threshold: f32,
}

impl Default for RunExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_THRESHOLD)
    }
}

impl RunExtractor {
    pub fn new(line_threshold: f32) -> Self {
        Self { line_threshold }
    }

    pub fn extract(&self, page: usize, items: &[PositionedGlyphItem]) -> Vec<TextRun> {
        let mut runs = Vec::new();
        let mut line: Vec<(usize, &PositionedGlyphItem)> = Vec::new();
        let mut last_y: Option<f32> = None;

        for (index, item) in items.iter().enumerate() {
            if item.text.trim().is_empty() {
                continue;
            }
            let new_line = match last_y {
                None => true,
                Some(y) => (item.y - y).abs() > self.line_threshold,
            };
            if new_line {
                if let Some(run) = build_run(page, runs.len(), &line) {
                    runs.push(run);
                }
                line.clear();
                last_y = Some(item.y);
            }
            line.push((index, item));
        }

        if let Some(run) = build_run(page, runs.len(), &line) {
            runs.push(run);
        }
        runs
    }
}

fn build_run(page: usize, ordinal: usize, line: &[(usize, &PositionedGlyphItem)]) -> Option<TextRun> {
    let (start_index, first) = *line.first()?;
    let (end_index, last) = *line.last()?;
    let text: String = line.iter().map(|(_, item)| item.text.as_str()).collect();
    Some(TextRun {
        id: RunId::for_ordinal(page, ordinal),
        text,
        x: first.x,
        y: first.y,
        width: last.x + last.width - first.x,
        height: first.height,
        descent: line
            .iter()
            .map(|(_, item)| item.descent)
            .fold(0.0, f32::max),
        font_size: first.font_size,
        font_name: first.font_name.clone(),
        page,
        start_index,
        end_index,
        style: TextStyle::from_font_name(&first.font_name),
    })
}

/// The current run set of one page. Commits mutate runs in place so later
/// hit-tests see the new text without re-extraction.
#[derive(Debug, Clone, Default)]
pub struct PageRuns {
    page: usize,
    runs: Vec<TextRun>,
}

impl PageRuns {
    pub fn new(page: usize, runs: Vec<TextRun>) -> Self {
        Self { page, runs }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    pub fn iter(&self) -> impl Iterator<Item = &TextRun> {
        self.runs.iter()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, id: &RunId) -> Option<&TextRun> {
        self.runs.iter().find(|run| &run.id == id)
    }

    pub fn get_mut(&mut self, id: &RunId) -> Option<&mut TextRun> {
        self.runs.iter_mut().find(|run| &run.id == id)
    }

    pub fn position(&self, id: &RunId) -> Option<usize> {
        self.runs.iter().position(|run| &run.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionAnchor {
    pub run_id: RunId,
    pub char_index: usize,
}

/// A character range, either inside one run or spanning several runs in
/// emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSelection {
    pub start: SelectionAnchor,
    pub end: SelectionAnchor,
}

impl TextSelection {
    pub fn within(run_id: RunId, start_char: usize, end_char: usize) -> Self {
        Self {
            start: SelectionAnchor {
                run_id: run_id.clone(),
                char_index: start_char,
            },
            end: SelectionAnchor {
                run_id,
                char_index: end_char,
            },
        }
    }

    pub fn is_single_run(&self) -> bool {
        self.start.run_id == self.end.run_id
    }

    pub fn is_valid(&self, runs: &PageRuns) -> bool {
        runs.get(&self.start.run_id).is_some() && runs.get(&self.end.run_id).is_some()
    }

    /// Selected text, or `None` if either anchor's run no longer exists.
    /// Anchors may be given in either order; runs are joined with `\n`.
    pub fn resolve(&self, runs: &PageRuns) -> Option<String> {
        let a = runs.position(&self.start.run_id)?;
        let b = runs.position(&self.end.run_id)?;
        let (first, last) = if (a, self.start.char_index) <= (b, self.end.char_index) {
            ((a, self.start.char_index), (b, self.end.char_index))
        } else {
            ((b, self.end.char_index), (a, self.start.char_index))
        };

        let mut parts = Vec::new();
        for (idx, run) in runs.runs()[first.0..=last.0].iter().enumerate() {
            let idx = idx + first.0;
            let len = run.char_len();
            let from = if idx == first.0 { first.1.min(len) } else { 0 };
            let to = if idx == last.0 { last.1.min(len) } else { len };
            parts.push(char_slice(&run.text, from, to.max(from)));
        }
        Some(parts.join("\n"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMatch {
    pub run_id: RunId,
    pub page: usize,
    pub start_char: usize,
    pub end_char: usize,
}

/// Every occurrence of `query` inside the runs, in run order. Matches do not
/// span runs.
pub fn find_text<'a>(
    runs: impl IntoIterator<Item = &'a TextRun>,
    query: &str,
    case_sensitive: bool,
) -> Vec<RunMatch> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    // one char per source char so offsets stay aligned with the run text
    let fold = |s: &str| -> Vec<char> {
        if case_sensitive {
            s.chars().collect()
        } else {
            s.chars()
                .map(|c| c.to_lowercase().next().unwrap_or(c))
                .collect()
        }
    };
    let needle = fold(query);

    let mut matches = Vec::new();
    for run in runs {
        let hay = fold(&run.text);
        if needle.len() > hay.len() {
            continue;
        }
        let mut start = 0;
        while start + needle.len() <= hay.len() {
            if hay[start..start + needle.len()] == needle[..] {
                matches.push(RunMatch {
                    run_id: run.id.clone(),
                    page: run.page,
                    start_char: start,
                    end_char: start + needle.len(),
                });
                start += needle.len();
            } else {
                start += 1;
            }
        }
    }
    matches
}

pub(crate) fn char_slice(text: &str, from: usize, to: usize) -> String {
    text.chars().skip(from).take(to.saturating_sub(from)).collect()
}
