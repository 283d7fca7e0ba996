//! Branch-aware undo/redo log over document-level edits.
//!
//! The manager only tracks the log. Undo hands back the inverse record and
//! redo the original one; materialising them against the document (and
//! replaying a branch after a switch) is up to the caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::annotation::{Annotation, AnnotationId};
use crate::commit::CommitTier;
use crate::error::EditError;
use crate::runs::RunId;
use crate::style::TextStyle;

pub const DEFAULT_MAX_RECORDS: usize = 100;
pub const DEFAULT_MAX_BRANCHES: usize = 10;
pub const MAIN_BRANCH: &str = "main";

/// Text and formatting of a run on one side of an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContent {
    pub text: String,
    /// Left edge the text was set at.
    pub x: f32,
    pub font_name: String,
    pub font_size: f32,
    pub width: f32,
    pub style: TextStyle,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverlayChange {
    pub added: Vec<Annotation>,
    pub removed: Vec<Annotation>,
}

/// One committed change. Every record can produce its inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditRecord {
    ReplaceRunText {
        page: usize,
        run_id: RunId,
        before: RunContent,
        after: RunContent,
        tier: CommitTier,
        overlay: OverlayChange,
    },
    AddAnnotation {
        annotation: Annotation,
    },
    RemoveAnnotation {
        annotation: Annotation,
    },
    MoveAnnotation {
        id: AnnotationId,
        page: usize,
        dx: f32,
        dy: f32,
    },
    RotatePage {
        page: usize,
        from_degrees: i32,
        to_degrees: i32,
    },
    InsertPage {
        index: usize,
    },
    DeletePage {
        index: usize,
    },
}

impl EditRecord {
    pub fn inverse(&self) -> EditRecord {
        match self {
            EditRecord::ReplaceRunText {
                page,
                run_id,
                before,
                after,
                tier,
                overlay,
            } => EditRecord::ReplaceRunText {
                page: *page,
                run_id: run_id.clone(),
                before: after.clone(),
                after: before.clone(),
                tier: *tier,
                overlay: OverlayChange {
                    added: overlay.removed.clone(),
                    removed: overlay.added.clone(),
                },
            },
            EditRecord::AddAnnotation { annotation } => EditRecord::RemoveAnnotation {
                annotation: annotation.clone(),
            },
            EditRecord::RemoveAnnotation { annotation } => EditRecord::AddAnnotation {
                annotation: annotation.clone(),
            },
            EditRecord::MoveAnnotation { id, page, dx, dy } => EditRecord::MoveAnnotation {
                id: *id,
                page: *page,
                dx: -dx,
                dy: -dy,
            },
            EditRecord::RotatePage {
                page,
                from_degrees,
                to_degrees,
            } => EditRecord::RotatePage {
                page: *page,
                from_degrees: *to_degrees,
                to_degrees: *from_degrees,
            },
            EditRecord::InsertPage { index } => EditRecord::DeletePage { index: *index },
            EditRecord::DeletePage { index } => EditRecord::InsertPage { index: *index },
        }
    }

    /// Page whose rendering this record affects.
    pub fn page(&self) -> usize {
        match self {
            EditRecord::ReplaceRunText { page, .. }
            | EditRecord::MoveAnnotation { page, .. }
            | EditRecord::RotatePage { page, .. } => *page,
            EditRecord::AddAnnotation { annotation } | EditRecord::RemoveAnnotation { annotation } => {
                annotation.page
            }
            EditRecord::InsertPage { index } | EditRecord::DeletePage { index } => *index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(Uuid);

impl BranchId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BranchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone)]
pub struct HistoryBranch {
    id: BranchId,
    name: String,
    records: Vec<EditRecord>,
    /// Index of the last applied record.
    cursor: Option<usize>,
    last_used: u64,
}

impl HistoryBranch {
    fn new(name: impl Into<String>, records: Vec<EditRecord>, last_used: u64) -> Self {
        let cursor = records.len().checked_sub(1);
        Self {
            id: BranchId::new(),
            name: name.into(),
            records,
            cursor,
            last_used,
        }
    }

    pub fn id(&self) -> BranchId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[EditRecord] {
        &self.records
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Records currently applied, oldest first.
    pub fn applied(&self) -> &[EditRecord] {
        &self.records[..self.applied_len()]
    }

    fn applied_len(&self) -> usize {
        self.cursor.map_or(0, |c| c + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryNotice {
    NothingToUndo,
    NothingToRedo,
}

impl fmt::Display for HistoryNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryNotice::NothingToUndo => f.write_str("nothing to undo"),
            HistoryNotice::NothingToRedo => f.write_str("nothing to redo"),
        }
    }
}

/// How [`HistoryManager::merge_branch`] reconciles two branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// The target becomes a copy of the source.
    Theirs,
    /// The target is left unchanged.
    Ours,
    /// Source records past the shared prefix are appended to the target's
    /// applied records.
    Combine,
}

/// Result of an undo/redo request.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStep {
    /// Record the caller must apply to the document.
    Apply(EditRecord),
    Nothing(HistoryNotice),
}

#[derive(Debug)]
pub struct HistoryManager {
    branches: Vec<HistoryBranch>,
    current: usize,
    max_records: usize,
    max_branches: usize,
    clock: u64,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS, DEFAULT_MAX_BRANCHES)
    }
}

impl HistoryManager {
    pub fn new(max_records: usize, max_branches: usize) -> Self {
        Self {
            branches: vec![HistoryBranch::new(MAIN_BRANCH, Vec::new(), 0)],
            current: 0,
            max_records: max_records.max(1),
            max_branches: max_branches.max(1),
            clock: 0,
        }
    }

    pub fn current(&self) -> &HistoryBranch {
        &self.branches[self.current]
    }

    pub fn branches(&self) -> &[HistoryBranch] {
        &self.branches
    }

    pub fn can_undo(&self) -> bool {
        self.current().cursor.is_some()
    }

    pub fn can_redo(&self) -> bool {
        let branch = self.current();
        branch.applied_len() < branch.records.len()
    }

    pub fn push(&mut self, record: EditRecord) {
        let stamp = self.tick();
        let max_records = self.max_records;
        let branch = &mut self.branches[self.current];
        let applied = branch.applied_len();
        branch.records.truncate(applied);
        branch.records.push(record);
        if branch.records.len() > max_records {
            let overflow = branch.records.len() - max_records;
            branch.records.drain(..overflow);
            debug!(overflow, branch = %branch.name, "dropped oldest history records");
        }
        branch.cursor = branch.records.len().checked_sub(1);
        branch.last_used = stamp;
    }

    /// The record `undo` would hand back, without moving the cursor.
    pub fn peek_undo(&self) -> Option<EditRecord> {
        let branch = self.current();
        branch.cursor.map(|cursor| branch.records[cursor].inverse())
    }

    /// The record `redo` would hand back, without moving the cursor.
    pub fn peek_redo(&self) -> Option<&EditRecord> {
        let branch = self.current();
        branch.records.get(branch.applied_len())
    }

    pub fn undo(&mut self) -> HistoryStep {
        let stamp = self.tick();
        let branch = &mut self.branches[self.current];
        let Some(cursor) = branch.cursor else {
            info!(branch = %branch.name, "nothing to undo");
            return HistoryStep::Nothing(HistoryNotice::NothingToUndo);
        };
        let inverse = branch.records[cursor].inverse();
        branch.cursor = cursor.checked_sub(1);
        branch.last_used = stamp;
        HistoryStep::Apply(inverse)
    }

    pub fn redo(&mut self) -> HistoryStep {
        let stamp = self.tick();
        let branch = &mut self.branches[self.current];
        let next = branch.applied_len();
        if next >= branch.records.len() {
            info!(branch = %branch.name, "nothing to redo");
            return HistoryStep::Nothing(HistoryNotice::NothingToRedo);
        }
        branch.cursor = Some(next);
        branch.last_used = stamp;
        HistoryStep::Apply(branch.records[next].clone())
    }

    /// Starts a new branch from the applied part of the current one. The
    /// current branch is left as it is and stays current.
    pub fn create_branch(&mut self, name: impl Into<String>) -> BranchId {
        let snapshot = self.current().applied().to_vec();
        self.push_branch(name.into(), snapshot)
    }

    /// Like [`HistoryManager::create_branch`], but snapshots `from` instead
    /// of the current branch.
    pub fn create_branch_from(
        &mut self,
        name: impl Into<String>,
        from: BranchId,
    ) -> Result<BranchId, EditError> {
        let snapshot = self.branch(from)?.applied().to_vec();
        Ok(self.push_branch(name.into(), snapshot))
    }

    fn push_branch(&mut self, name: String, records: Vec<EditRecord>) -> BranchId {
        if self.branches.len() >= self.max_branches {
            self.evict_branch();
        }
        let stamp = self.tick();
        let branch = HistoryBranch::new(name, records, stamp);
        let id = branch.id;
        debug!(branch = %branch.name, %id, records = branch.records.len(), "created history branch");
        self.branches.push(branch);
        id
    }

    pub fn branch(&self, id: BranchId) -> Result<&HistoryBranch, EditError> {
        Ok(&self.branches[self.index_of(id)?])
    }

    /// Merges `source` into `target` and returns the target's applied
    /// records afterwards. When `target` is current the caller must
    /// materialise them, as after a switch.
    pub fn merge_branch(
        &mut self,
        source: BranchId,
        target: BranchId,
        strategy: MergeStrategy,
    ) -> Result<&[EditRecord], EditError> {
        let source_idx = self.index_of(source)?;
        let target_idx = self.index_of(target)?;
        let stamp = self.tick();
        let max_records = self.max_records;
        let incoming = self.branches[source_idx].clone();
        let branch = &mut self.branches[target_idx];

        match strategy {
            MergeStrategy::Ours => {}
            MergeStrategy::Theirs => {
                branch.records = incoming.records;
                branch.cursor = incoming.cursor;
            }
            MergeStrategy::Combine => {
                let ours = branch.applied_len();
                let theirs = incoming.applied();
                let shared = branch.records[..ours]
                    .iter()
                    .zip(theirs)
                    .take_while(|(a, b)| a == b)
                    .count();
                branch.records.truncate(ours);
                branch.records.extend_from_slice(&theirs[shared..]);
                if branch.records.len() > max_records {
                    let overflow = branch.records.len() - max_records;
                    branch.records.drain(..overflow);
                }
                branch.cursor = branch.records.len().checked_sub(1);
            }
        }
        branch.last_used = stamp;
        debug!(branch = %branch.name, from = %incoming.name, ?strategy, "merged history branches");
        Ok(branch.applied())
    }

    /// Drops every branch and record, leaving an empty main branch.
    pub fn clear(&mut self) {
        self.branches = vec![HistoryBranch::new(MAIN_BRANCH, Vec::new(), 0)];
        self.current = 0;
        self.clock = 0;
    }

    /// Makes `id` current and returns its applied records, which the caller
    /// must materialise.
    pub fn switch_branch(&mut self, id: BranchId) -> Result<&[EditRecord], EditError> {
        let idx = self.index_of(id)?;
        self.current = idx;
        let stamp = self.tick();
        let branch = &mut self.branches[idx];
        branch.last_used = stamp;
        Ok(branch.applied())
    }

    pub fn delete_branch(&mut self, id: BranchId) -> Result<(), EditError> {
        let idx = self.index_of(id)?;
        if idx == self.current {
            return Err(EditError::InvalidState(
                "cannot delete the current history branch".into(),
            ));
        }
        self.branches.remove(idx);
        if idx < self.current {
            self.current -= 1;
        }
        Ok(())
    }

    fn index_of(&self, id: BranchId) -> Result<usize, EditError> {
        self.branches
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| EditError::branch_not_found(id.to_string()))
    }

    fn evict_branch(&mut self) {
        let victim = self
            .branches
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != self.current)
            .min_by_key(|(_, b)| b.last_used)
            .map(|(idx, _)| idx);
        if let Some(idx) = victim {
            let removed = self.branches.remove(idx);
            debug!(branch = %removed.name, "evicted least recently used history branch");
            if idx < self.current {
                self.current -= 1;
            }
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
