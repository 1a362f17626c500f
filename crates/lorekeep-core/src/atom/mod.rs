//! Atom - the unified content record
//!
//! One atom represents a note, a task, or a calendar event. The kind is an
//! explicit tagged variant; task status and time boundaries are optional and
//! uniform across kinds (status is an atom-agnostic concept). Atoms are never
//! physically removed by normal operations - deletion is a tombstone flag.

mod repo;

pub use repo::{AtomRepository, RepoError, RepoResult, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
pub(crate) use repo::now_ms;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable atom identifier.
pub type AtomId = Uuid;

// ============================================================================
// KIND AND STATUS
// ============================================================================

/// Atom content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomKind {
    /// Free-form markdown note.
    Note,
    /// Actionable task.
    Task,
    /// Calendar event with optional time boundaries.
    Event,
}

impl AtomKind {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomKind::Note => "note",
            AtomKind::Task => "task",
            AtomKind::Event => "event",
        }
    }

    /// Parses the stable string form.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "note" => Some(AtomKind::Note),
            "task" => Some(AtomKind::Task),
            "event" => Some(AtomKind::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for AtomKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task lifecycle state. Applies to any atom kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the stable string form.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Invalid kind/time combinations caught before anything touches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AtomValidationError {
    /// `end_at` was supplied without `start_at`.
    #[error("end_at ({end}) requires start_at")]
    EndWithoutStart { end: i64 },
    /// The time window is reversed.
    #[error("end_at ({end}) must be >= start_at ({start})")]
    WindowReversed { start: i64, end: i64 },
}

/// Validates the start/end combination: both unset (inbox), start only
/// (point event), or both set with `end >= start` (ranged event).
pub fn validate_window(
    start_at: Option<i64>,
    end_at: Option<i64>,
) -> Result<(), AtomValidationError> {
    match (start_at, end_at) {
        (None, Some(end)) => Err(AtomValidationError::EndWithoutStart { end }),
        (Some(start), Some(end)) if end < start => {
            Err(AtomValidationError::WindowReversed { start, end })
        }
        _ => Ok(()),
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// A persisted atom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    /// Stable unique identifier.
    pub id: AtomId,
    /// Content kind.
    pub kind: AtomKind,
    /// Markdown body.
    pub content: String,
    /// Normalized tag set (trimmed, lower-cased, deduplicated), name ascending.
    pub tags: Vec<String>,
    /// Lifecycle status, if any.
    pub task_status: Option<TaskStatus>,
    /// Epoch ms - start boundary. `None` together with `end_at` means inbox.
    pub start_at: Option<i64>,
    /// Epoch ms - end boundary. Requires `start_at`; never precedes it.
    pub end_at: Option<i64>,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms, refreshed on every mutation.
    pub updated_at: i64,
    /// Soft-delete tombstone.
    pub is_deleted: bool,
}

/// Input for creating an atom. The repository assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AtomDraft {
    pub kind: Option<AtomKind>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub task_status: Option<TaskStatus>,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
}

impl AtomDraft {
    /// Draft for a plain note.
    pub fn note(content: impl Into<String>) -> Self {
        Self {
            kind: Some(AtomKind::Note),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Draft for a task with the default `todo` status.
    pub fn task(content: impl Into<String>) -> Self {
        Self {
            kind: Some(AtomKind::Task),
            content: content.into(),
            task_status: Some(TaskStatus::Todo),
            ..Self::default()
        }
    }

    /// Draft for a scheduled event. A `None` end makes a point event.
    pub fn event(content: impl Into<String>, start_at: i64, end_at: Option<i64>) -> Self {
        Self {
            kind: Some(AtomKind::Event),
            content: content.into(),
            start_at: Some(start_at),
            end_at,
            ..Self::default()
        }
    }

    /// Checks time-window invariants before persistence.
    pub fn validate(&self) -> Result<(), AtomValidationError> {
        validate_window(self.start_at, self.end_at)
    }

    /// Kind to persist; drafts without an explicit kind are notes.
    pub fn kind_or_default(&self) -> AtomKind {
        self.kind.unwrap_or(AtomKind::Note)
    }
}

// ============================================================================
// NORMALIZATION AND PROJECTIONS
// ============================================================================

/// Normalizes one tag: trimmed and lower-cased. Blank tags normalize to
/// nothing rather than an error.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes and deduplicates a tag list, name ascending.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut unique = BTreeSet::new();
    for tag in tags {
        if let Some(value) = normalize_tag(tag) {
            unique.insert(value);
        }
    }
    unique.into_iter().collect()
}

/// Maximum characters kept by [`content_label`].
const LABEL_MAX_CHARS: usize = 80;

/// Derives a display label from markdown content: the first line that still
/// has text after stripping leading list/heading/quote markers and inline
/// emphasis characters, capped at a bounded length.
pub fn content_label(content: &str) -> String {
    for line in content.lines() {
        let stripped = line
            .trim_start_matches(|c: char| matches!(c, '#' | '>' | '-' | '*' | '+') || c.is_whitespace());
        let cleaned: String = stripped
            .chars()
            .filter(|c| !matches!(c, '`' | '*' | '_' | '~'))
            .collect();
        let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            return collapsed.chars().take(LABEL_MAX_CHARS).collect();
        }
    }
    "Untitled".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_status_roundtrip() {
        for kind in [AtomKind::Note, AtomKind::Task, AtomKind::Event] {
            assert_eq!(AtomKind::parse_name(kind.as_str()), Some(kind));
        }
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse_name(status.as_str()), Some(status));
        }
        assert_eq!(AtomKind::parse_name("reminder"), None);
    }

    #[test]
    fn window_validation_covers_all_shapes() {
        validate_window(None, None).unwrap();
        validate_window(Some(100), None).unwrap();
        validate_window(Some(100), Some(100)).unwrap();
        validate_window(Some(100), Some(200)).unwrap();

        assert_eq!(
            validate_window(None, Some(50)),
            Err(AtomValidationError::EndWithoutStart { end: 50 })
        );
        assert_eq!(
            validate_window(Some(200), Some(100)),
            Err(AtomValidationError::WindowReversed {
                start: 200,
                end: 100
            })
        );
    }

    #[test]
    fn tags_normalize_to_sorted_lowercase_set() {
        let tags = vec![
            "Work".to_string(),
            " work ".to_string(),
            "".to_string(),
            "ALPHA".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["alpha", "work"]);
    }

    #[test]
    fn label_skips_markdown_markers_and_blank_lines() {
        assert_eq!(content_label("# Title line\nbody"), "Title line");
        assert_eq!(content_label("\n\n- **bold** item"), "bold item");
        assert_eq!(content_label("### \n> quoted  text "), "quoted text");
        assert_eq!(content_label("*** ___ ```"), "Untitled");
    }

    #[test]
    fn label_is_bounded() {
        let long = "x".repeat(500);
        assert_eq!(content_label(&long).chars().count(), 80);
    }

    #[test]
    fn atom_serializes_with_snake_case_kind() {
        let draft = AtomDraft::task("ship it");
        let json = serde_json::to_string(&draft).unwrap();
        assert!(json.contains("\"task\""));
        assert!(json.contains("\"todo\""));
    }
}
