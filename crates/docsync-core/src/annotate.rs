//! Provenance annotation for uploaded documents.
//!
//! Every synced document carries a small comment block at the top recording
//! who created it and an append-only list of later edits:
//!
//! ```text
//! <!-- docsync:provenance
//! created: Alice @ 2026-10-16T09:30:00Z
//! history:
//! - updated: Bob @ 2026-10-16T11:02:41Z [~3-4, +10-12]
//! -->
//! # Sprint notes
//! ```
//!
//! The first line is the sentinel: its presence means the block exists, so
//! re-annotating only appends history and never writes a second `created`
//! line. The bracketed change summary is a display aid computed against the
//! previous remote version; it never affects sync and never fails the call.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;
use tracing::{debug, warn};

/// First line of every provenance block.
pub const SENTINEL: &str = "<!-- docsync:provenance";

const BLOCK_END: &str = "-->";
const CREATED_PREFIX: &str = "created: ";
const HISTORY_HEADER: &str = "history:";
const HISTORY_PREFIX: &str = "- ";

/// Most change descriptors appended to one history line.
pub const MAX_DESCRIPTORS: usize = 5;

/// Line count past which the diff is skipped.
pub const MAX_DIFF_LINES: usize = 20_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("Document too large to diff ({0} lines)")]
    TooManyLines(usize),

    #[error("Provenance block is not terminated")]
    Unterminated,
}

/// Kind of change in a diff descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Modified,
    Deleted,
}

impl DiffKind {
    fn symbol(self) -> char {
        match self {
            DiffKind::Added => '+',
            DiffKind::Modified => '~',
            DiffKind::Deleted => '-',
        }
    }
}

/// A contiguous range of changed lines (1-based, inclusive).
///
/// Added and modified ranges use new-side line numbers, deleted ranges use
/// old-side line numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineChange {
    pub kind: DiffKind,
    pub start: usize,
    pub end: usize,
}

impl Display for LineChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}{}", self.kind.symbol(), self.start)
        } else {
            write!(f, "{}{}-{}", self.kind.symbol(), self.start, self.end)
        }
    }
}

/// Parsed provenance block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// `"<author> @ <timestamp>"` of the first upload
    pub created: String,
    /// One entry per later edit, oldest first
    pub history: Vec<String>,
}

impl Provenance {
    /// Parse the block at the top of `content`, if it carries a well-formed one.
    pub fn parse(content: &str) -> Option<Self> {
        split(content).ok().and_then(|(block, _)| block)
    }

    fn created_by(author: &str, now: DateTime<Utc>) -> Self {
        Self {
            created: format!("{} @ {}", sanitize(author), timestamp(now)),
            history: Vec::new(),
        }
    }

    fn render(&self) -> String {
        let mut block = String::new();
        block.push_str(SENTINEL);
        block.push('\n');
        block.push_str(CREATED_PREFIX);
        block.push_str(&self.created);
        block.push('\n');
        block.push_str(HISTORY_HEADER);
        block.push('\n');
        for entry in &self.history {
            block.push_str(HISTORY_PREFIX);
            block.push_str(entry);
            block.push('\n');
        }
        block.push_str(BLOCK_END);
        block.push('\n');
        block
    }

    fn parse_block(inner: &str) -> Self {
        let mut created = String::new();
        let mut history = Vec::new();

        for line in inner.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix(CREATED_PREFIX) {
                if created.is_empty() {
                    created = rest.to_string();
                }
            } else if let Some(rest) = line.strip_prefix(HISTORY_PREFIX) {
                history.push(rest.to_string());
            }
        }

        Self { created, history }
    }
}

/// Split content into its provenance block (if any) and body.
pub fn split(content: &str) -> Result<(Option<Provenance>, &str), AnnotationError> {
    let Some(after_sentinel) = content.strip_prefix(SENTINEL) else {
        return Ok((None, content));
    };

    let close = find_block_end(after_sentinel).ok_or(AnnotationError::Unterminated)?;
    let inner = &after_sentinel[..close];
    let rest = &after_sentinel[close + BLOCK_END.len()..];
    let body = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);

    Ok((Some(Provenance::parse_block(inner)), body))
}

/// Content with the provenance block removed.
///
/// Content with a malformed block is returned whole.
pub fn strip(content: &str) -> &str {
    match split(content) {
        Ok((_, body)) => body,
        Err(_) => content,
    }
}

/// Whether the content already carries a provenance block.
pub fn has_provenance(content: &str) -> bool {
    content.starts_with(SENTINEL)
}

/// The block terminator must sit on its own line.
fn find_block_end(after_sentinel: &str) -> Option<usize> {
    let mut offset = 0;
    for line in after_sentinel.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == BLOCK_END {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Inject or extend the provenance block of `new_content` before upload.
///
/// - No block in `new_content` and none in `previous`: prepend a block
///   attributing creation to `author`; the content is otherwise unchanged.
/// - Block present: append an `updated` history entry. With `previous`, a
///   summary of up to [`MAX_DESCRIPTORS`] changed ranges is attached.
/// - No block locally but `previous` has one (the local copy predates the
///   remote annotation): the previous block is carried over and extended, so
///   the original creator is never overwritten.
///
/// Never fails: a diff error only drops the change summary, and a malformed
/// block leaves the content as it is.
pub fn annotate(
    new_content: &str,
    filename: &str,
    previous: Option<&str>,
    author: &str,
    now: DateTime<Utc>,
) -> String {
    let (block, body) = match split(new_content) {
        Ok(parts) => parts,
        Err(e) => {
            warn!("Leaving {} unannotated: {}", filename, e);
            return new_content.to_string();
        }
    };

    let previous_parts = previous.and_then(|prev| split(prev).ok());
    let inherited = previous_parts.as_ref().and_then(|(block, _)| block.clone());

    let mut provenance = match block.or(inherited) {
        Some(existing) => existing,
        None => {
            debug!("Adding provenance to {}", filename);
            return format!("{}{}", Provenance::created_by(author, now).render(), body);
        }
    };

    let mut entry = format!("updated: {} @ {}", sanitize(author), timestamp(now));
    if let Some((_, previous_body)) = previous_parts {
        match diff_lines(previous_body, body) {
            Ok(changes) if !changes.is_empty() => {
                let summary: Vec<String> = changes
                    .iter()
                    .take(MAX_DESCRIPTORS)
                    .map(ToString::to_string)
                    .collect();
                entry.push_str(&format!(" [{}]", summary.join(", ")));
            }
            Ok(_) => {}
            Err(e) => debug!("No change summary for {}: {}", filename, e),
        }
    }

    if provenance.created.is_empty() {
        provenance.created = format!("{} @ {}", sanitize(author), timestamp(now));
    }
    provenance.history.push(entry);
    debug!("Appended history entry to {}", filename);

    format!("{}{}", provenance.render(), body)
}

/// Two-pointer line alignment between two versions.
///
/// Both cursors advance while lines match. A mismatch while both sides still
/// have lines is a modification; lines left over on the new side are
/// additions, lines left over on the old side are deletions. Adjacent lines
/// of the same kind merge into one range.
pub fn diff_lines(old: &str, new: &str) -> Result<Vec<LineChange>, AnnotationError> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let largest = old_lines.len().max(new_lines.len());
    if largest > MAX_DIFF_LINES {
        return Err(AnnotationError::TooManyLines(largest));
    }

    let mut changes: Vec<LineChange> = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < old_lines.len() && j < new_lines.len() {
        if old_lines[i] != new_lines[j] {
            push_change(&mut changes, DiffKind::Modified, j + 1);
        }
        i += 1;
        j += 1;
    }
    while j < new_lines.len() {
        push_change(&mut changes, DiffKind::Added, j + 1);
        j += 1;
    }
    while i < old_lines.len() {
        push_change(&mut changes, DiffKind::Deleted, i + 1);
        i += 1;
    }

    Ok(changes)
}

fn push_change(changes: &mut Vec<LineChange>, kind: DiffKind, line: usize) {
    if let Some(last) = changes.last_mut() {
        if last.kind == kind && last.end + 1 == line {
            last.end = line;
            return;
        }
    }
    changes.push(LineChange {
        kind,
        start: line,
        end: line,
    });
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Keep author names from breaking the block's line structure.
fn sanitize(author: &str) -> String {
    let cleaned = author.replace(['\n', '\r'], " ").replace(BLOCK_END, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "Anonymous".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_first_annotation_prepends_created_block() {
        let annotated = annotate("# Notes\n#sprint\n", "notes.md", None, "Alice", at(9));

        assert!(annotated.starts_with(SENTINEL));
        assert!(annotated.contains("created: Alice @ 2026-10-16T09:00:00Z\n"));
        assert!(annotated.ends_with("-->\n# Notes\n#sprint\n"));
        assert_eq!(strip(&annotated), "# Notes\n#sprint\n");
    }

    #[test]
    fn test_reannotation_never_duplicates_created_line() {
        let once = annotate("body\n", "a.md", None, "Alice", at(9));
        let twice = annotate(&once, "a.md", None, "Alice", at(10));

        assert_eq!(twice.matches("created:").count(), 1);
        assert_eq!(twice.matches(SENTINEL).count(), 1);

        let (block, body) = split(&twice).unwrap();
        let block = block.unwrap();
        assert_eq!(block.created, "Alice @ 2026-10-16T09:00:00Z");
        assert_eq!(block.history, vec!["updated: Alice @ 2026-10-16T10:00:00Z".to_string()]);
        assert_eq!(body, "body\n");
    }

    #[test]
    fn test_update_with_previous_appends_change_summary() {
        let previous = annotate("one\ntwo\nthree\n", "a.md", None, "Alice", at(9));
        let edited = previous.replace("two\nthree\n", "TWO\nthree\nfour\nfive\n");

        let annotated = annotate(&edited, "a.md", Some(&previous), "Bob", at(11));

        let (block, body) = split(&annotated).unwrap();
        assert_eq!(body, "one\nTWO\nthree\nfour\nfive\n");
        assert_eq!(
            block.unwrap().history,
            vec!["updated: Bob @ 2026-10-16T11:00:00Z [~2, +4-5]".to_string()]
        );
    }

    #[test]
    fn test_history_is_append_only() {
        let v1 = annotate("a\n", "a.md", None, "Alice", at(9));
        let v2 = annotate(&format!("{}b\n", v1), "a.md", Some(&v1), "Bob", at(10));
        let v3 = annotate(&v2, "a.md", Some(&v2), "Carol", at(11));

        let (block, _) = split(&v3).unwrap();
        let history = block.unwrap().history;
        assert_eq!(history.len(), 2);
        assert!(history[0].starts_with("updated: Bob"));
        assert!(history[0].ends_with("[+2]"));
        // Identical bodies produce no summary
        assert_eq!(history[1], "updated: Carol @ 2026-10-16T11:00:00Z");
    }

    #[test]
    fn test_local_copy_without_block_inherits_remote_block() {
        let remote = annotate("draft\n", "a.md", None, "Alice", at(9));

        let annotated = annotate("draft\nmore\n", "a.md", Some(&remote), "Bob", at(12));

        let (block, body) = split(&annotated).unwrap();
        let block = block.unwrap();
        assert_eq!(block.created, "Alice @ 2026-10-16T09:00:00Z");
        assert_eq!(block.history, vec!["updated: Bob @ 2026-10-16T12:00:00Z [+2]".to_string()]);
        assert_eq!(body, "draft\nmore\n");
    }

    #[test]
    fn test_unterminated_block_is_left_alone() {
        let broken = format!("{}\ncreated: Alice @ x\nno end", SENTINEL);
        assert_eq!(annotate(&broken, "a.md", None, "Bob", at(9)), broken);
        assert_eq!(strip(&broken), broken);
    }

    #[test]
    fn test_diff_classifies_by_exhausted_side() {
        assert_eq!(diff_lines("a\nb\nc", "a\nb\nc").unwrap(), vec![]);

        assert_eq!(
            diff_lines("a\nb\nc\nd", "a\nb").unwrap(),
            vec![LineChange { kind: DiffKind::Deleted, start: 3, end: 4 }]
        );

        assert_eq!(
            diff_lines("a\nx\ny\nd", "a\nb\nc\nd\ne").unwrap(),
            vec![
                LineChange { kind: DiffKind::Modified, start: 2, end: 3 },
                LineChange { kind: DiffKind::Added, start: 5, end: 5 },
            ]
        );
    }

    #[test]
    fn test_summary_is_capped() {
        let old = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl";
        let new = "A\nb\nC\nd\nE\nf\nG\nh\nI\nj\nK\nl";
        assert_eq!(diff_lines(old, new).unwrap().len(), 6);

        let previous = annotate(old, "a.md", None, "Alice", at(9));
        let edited = format!("{}{}", previous.strip_suffix(old).unwrap(), new);
        let annotated = annotate(&edited, "a.md", Some(&previous), "Bob", at(10));

        assert!(annotated.contains("[~1, ~3, ~5, ~7, ~9]\n"));
    }

    #[test]
    fn test_oversized_diff_degrades_to_plain_entry() {
        let big = "x\n".repeat(MAX_DIFF_LINES + 1);
        assert_eq!(
            diff_lines(&big, "x"),
            Err(AnnotationError::TooManyLines(MAX_DIFF_LINES + 1))
        );

        let previous = annotate(&big, "big.md", None, "Alice", at(9));
        let annotated = annotate(&previous, "big.md", Some(&previous), "Bob", at(10));
        assert!(annotated.contains("- updated: Bob @ 2026-10-16T10:00:00Z\n"));
    }

    #[test]
    fn test_author_cannot_break_block() {
        let annotated = annotate("x", "a.md", None, "Eve\n-->\nhi", at(9));
        let (block, body) = split(&annotated).unwrap();
        assert_eq!(body, "x");
        assert_eq!(block.unwrap().created, "Eve  hi @ 2026-10-16T09:00:00Z");
    }
}
