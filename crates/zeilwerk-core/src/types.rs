// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Zeilwerk pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// A half-open row range `[start, end)` holding one detected text line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineInterval {
    pub start: u32,
    pub end: u32,
}

impl LineInterval {
    /// Number of rows covered.
    pub fn height(&self) -> u32 {
        self.end - self.start
    }

    /// Whether two intervals share at least one row.
    pub fn overlaps(&self, other: &LineInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for LineInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Identity of a line image: its 1-based position plus where it lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId {
    /// 1-based index matching output ordering.
    pub index: usize,
    /// Path of the persisted line image, if it was written or re-loaded.
    pub path: Option<PathBuf>,
}

impl LineId {
    pub fn new(index: usize, path: Option<PathBuf>) -> Self {
        Self { index, path }
    }

    /// Human-facing name: the file name when persisted, `line_NNN` otherwise.
    pub fn label(&self) -> String {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("line_{:03}", self.index))
    }
}

impl std::fmt::Display for LineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// What a single backend produced for a single line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Recognized text (may legitimately be empty).
    Text(String),
    /// The backend failed; the string is the reason.
    Failed(String),
}

impl Outcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl From<Result<String>> for Outcome {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(text) => Self::Text(text),
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

/// One `(line, backend) -> outcome` association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub backend: String,
    pub outcome: Outcome,
}

/// How many of a line's backends succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    /// Every backend produced text.
    Complete,
    /// Some backends produced text, some failed.
    Partial,
    /// No backend produced text (or none was configured).
    Failed,
}

/// All backend results for one line, in configured backend order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecognition {
    pub line: LineId,
    pub results: Vec<RecognitionResult>,
}

impl LineRecognition {
    pub fn new(line: LineId) -> Self {
        Self {
            line,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, backend: impl Into<String>, outcome: Outcome) {
        self.results.push(RecognitionResult {
            backend: backend.into(),
            outcome,
        });
    }

    /// Outcome recorded for `backend`, if that backend ran on this line.
    pub fn outcome(&self, backend: &str) -> Option<&Outcome> {
        self.results
            .iter()
            .find(|r| r.backend == backend)
            .map(|r| &r.outcome)
    }

    pub fn status(&self) -> LineStatus {
        let ok = self.results.iter().filter(|r| r.outcome.is_success()).count();
        if ok == 0 {
            LineStatus::Failed
        } else if ok == self.results.len() {
            LineStatus::Complete
        } else {
            LineStatus::Partial
        }
    }

    /// Failure reasons, prefixed with the backend that produced them.
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Failed(reason) => Some(format!("{}: {}", r.backend, reason)),
                Outcome::Text(_) => None,
            })
            .collect()
    }

    /// Text of the first successful backend; empty when all of them failed.
    pub fn text(&self) -> &str {
        self.results
            .iter()
            .find_map(|r| r.outcome.text())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZeilwerkError;

    #[test]
    fn interval_height_counts_rows() {
        assert_eq!(LineInterval { start: 5, end: 15 }.height(), 10);
    }

    #[test]
    fn interval_overlap_is_half_open() {
        let a = LineInterval { start: 0, end: 10 };
        let b = LineInterval { start: 10, end: 20 };
        let c = LineInterval { start: 9, end: 12 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn line_label_prefers_file_name() {
        let in_memory = LineId::new(7, None);
        assert_eq!(in_memory.label(), "line_007");

        let on_disk = LineId::new(7, Some(PathBuf::from("/tmp/lines/line_007.png")));
        assert_eq!(on_disk.label(), "line_007.png");
    }

    #[test]
    fn status_and_errors_follow_outcomes() {
        let mut line = LineRecognition::new(LineId::new(1, None));
        assert_eq!(line.status(), LineStatus::Failed);

        line.push("a", Outcome::Text("hello".into()));
        assert_eq!(line.status(), LineStatus::Complete);

        line.push("b", Outcome::Failed("model missing".into()));
        assert_eq!(line.status(), LineStatus::Partial);
        assert_eq!(line.errors(), vec!["b: model missing".to_string()]);
        assert_eq!(line.text(), "hello");
    }

    #[test]
    fn all_failed_line_has_empty_text() {
        let mut line = LineRecognition::new(LineId::new(3, None));
        line.push("a", Outcome::Failed("boom".into()));
        line.push("b", Outcome::Failed("timeout".into()));
        assert_eq!(line.status(), LineStatus::Failed);
        assert_eq!(line.text(), "");
        assert_eq!(line.errors().len(), 2);
    }

    #[test]
    fn outcome_from_result() {
        let ok: Outcome = Ok::<_, ZeilwerkError>("abc".to_string()).into();
        assert_eq!(ok, Outcome::Text("abc".into()));

        let err: Outcome = Err(ZeilwerkError::backend_unavailable("k", "gone")).into();
        assert!(matches!(err, Outcome::Failed(reason) if reason.contains("gone")));
    }
}
