//! Line-level diff previews
//!
//! Backs the `status`/`diff` surfaces: per-file added/removed/changed line
//! counts and an inline listing with a configurable context window. Merge
//! and delta encoding have their own diff paths; this module is display
//! only.

use similar::{DiffTag, TextDiff};

/// Summary counts for one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl DiffStats {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.changed == 0
    }
}

/// One rendered line of an inline diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    /// Unchanged context line (old line number, text)
    Context(usize, String),
    /// Line present only in the new content (new line number, text)
    Added(usize, String),
    /// Line present only in the old content (old line number, text)
    Removed(usize, String),
    /// Gap between context groups
    Separator,
}

/// Count added, removed and changed lines between two byte buffers.
///
/// A replaced run counts as changed up to the shorter side's length; the
/// remainder counts as added or removed.
pub fn stats(old: &[u8], new: &[u8]) -> DiffStats {
    let diff = TextDiff::from_lines(old, new);
    let mut out = DiffStats::default();
    for op in diff.ops() {
        let old_len = op.old_range().len();
        let new_len = op.new_range().len();
        match op.tag() {
            DiffTag::Equal => {}
            DiffTag::Insert => out.added += new_len,
            DiffTag::Delete => out.removed += old_len,
            DiffTag::Replace => {
                let both = old_len.min(new_len);
                out.changed += both;
                out.added += new_len - both;
                out.removed += old_len - both;
            }
        }
    }
    out
}

/// Render an inline diff with `context` unchanged lines around each change
pub fn lines(old: &[u8], new: &[u8], context: usize) -> Vec<DiffLine> {
    let diff = TextDiff::from_lines(old, new);
    let old_lines = diff.old_slices();
    let new_lines = diff.new_slices();

    let mut out = Vec::new();
    for (group_idx, group) in diff.grouped_ops(context).iter().enumerate() {
        if group_idx > 0 {
            out.push(DiffLine::Separator);
        }
        for op in group {
            match op.tag() {
                DiffTag::Equal => {
                    for (offset, line) in old_lines[op.old_range()].iter().enumerate() {
                        out.push(DiffLine::Context(
                            op.old_range().start + offset + 1,
                            text(line),
                        ));
                    }
                }
                DiffTag::Delete | DiffTag::Insert | DiffTag::Replace => {
                    for (offset, line) in old_lines[op.old_range()].iter().enumerate() {
                        out.push(DiffLine::Removed(
                            op.old_range().start + offset + 1,
                            text(line),
                        ));
                    }
                    for (offset, line) in new_lines[op.new_range()].iter().enumerate() {
                        out.push(DiffLine::Added(
                            op.new_range().start + offset + 1,
                            text(line),
                        ));
                    }
                }
            }
        }
    }
    out
}

fn text(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
