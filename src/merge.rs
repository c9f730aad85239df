//! Three-way text merge.
//!
//! The resolver treats the merge algorithm as a replaceable capability
//! ([`TextMerger`]). The default implementation, [`Diff3Merger`], performs a
//! line-based diff3 with the `merge3` crate and refuses to merge binary
//! content (detected with `content_inspector`).

use merge3::{Merge3, MergeGroup};

use crate::WcError;

/// Labels written on conflict marker lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeLabels {
    /// Label of the common ancestor section.
    pub base: String,
    /// Label of the incoming section.
    pub left: String,
    /// Label of the local section.
    pub right: String,
}

impl Default for MergeLabels {
    fn default() -> Self {
        Self {
            base: ".base".to_string(),
            left: ".theirs".to_string(),
            right: ".mine".to_string(),
        }
    }
}

/// Outcome of a three-way merge.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    /// The result equals the local text.
    Unchanged,
    /// Both sides merged without overlap.
    Merged,
    /// Overlapping changes; the result contains conflict markers (or, for
    /// binary content, the unmodified local text).
    Conflict,
}

/// Result of [`TextMerger::merge3`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    /// Merge outcome.
    pub outcome: MergeOutcome,
    /// Merged bytes to install as the new working text.
    pub merged: Vec<u8>,
}

/// A three-way text merge primitive.
pub trait TextMerger: Send + Sync {
    /// Merges the change `base -> left` into `right`.
    fn merge3(
        &self,
        base: &[u8],
        left: &[u8],
        right: &[u8],
        labels: &MergeLabels,
    ) -> Result<MergeResult, WcError>;
}

/// Line-based diff3 merger.
#[derive(Clone, Copy, Debug, Default)]
pub struct Diff3Merger;

impl Diff3Merger {
    /// Creates the merger.
    pub fn new() -> Self {
        Self
    }
}

impl TextMerger for Diff3Merger {
    fn merge3(
        &self,
        base: &[u8],
        left: &[u8],
        right: &[u8],
        labels: &MergeLabels,
    ) -> Result<MergeResult, WcError> {
        let texts = (as_text(base), as_text(left), as_text(right));
        let (Some(base_text), Some(left_text), Some(right_text)) = texts else {
            return Ok(MergeResult {
                outcome: if left == base || left == right {
                    MergeOutcome::Unchanged
                } else {
                    MergeOutcome::Conflict
                },
                merged: right.to_vec(),
            });
        };

        let base_lines = split_lines(base_text);
        let left_lines = split_lines(left_text);
        let right_lines = split_lines(right_text);

        let m3 = Merge3::new(&base_lines, &right_lines, &left_lines);
        let groups = m3.merge_groups();

        let mut merged = Vec::with_capacity(right.len());
        let mut has_conflicts = false;
        for group in &groups {
            match group {
                MergeGroup::Unchanged(lines)
                | MergeGroup::Same(lines)
                | MergeGroup::A(lines)
                | MergeGroup::B(lines) => {
                    push_lines(&mut merged, lines, false);
                }
                MergeGroup::Conflict(base_lines, mine_lines, theirs_lines) => {
                    has_conflicts = true;
                    push_conflict(&mut merged, base_lines, mine_lines, theirs_lines, labels);
                }
            }
        }

        let outcome = if has_conflicts {
            MergeOutcome::Conflict
        } else if merged == right {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Merged
        };
        Ok(MergeResult { outcome, merged })
    }
}

fn as_text(bytes: &[u8]) -> Option<&str> {
    if content_inspector::inspect(bytes).is_binary() {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

/// Splits text into lines, keeping each line's terminator.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn push_lines(out: &mut Vec<u8>, lines: &[&str], terminate: bool) {
    for line in lines {
        out.extend_from_slice(line.as_bytes());
        if terminate && !line.ends_with('\n') {
            out.push(b'\n');
        }
    }
}

fn push_conflict(
    out: &mut Vec<u8>,
    base_lines: &Option<&[&str]>,
    mine_lines: &[&str],
    theirs_lines: &[&str],
    labels: &MergeLabels,
) {
    out.extend_from_slice(format!("<<<<<<< {}\n", labels.right).as_bytes());
    push_lines(out, mine_lines, true);
    if let Some(base) = base_lines {
        out.extend_from_slice(format!("||||||| {}\n", labels.base).as_bytes());
        push_lines(out, base, true);
    }
    out.extend_from_slice(b"=======\n");
    push_lines(out, theirs_lines, true);
    out.extend_from_slice(format!(">>>>>>> {}\n", labels.left).as_bytes());
}
