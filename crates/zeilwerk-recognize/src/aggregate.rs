// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Result aggregator — collects per-line recognition results into a page
// transcript and renders it as a report, a flat transcript, or JSON.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};
use zeilwerk_core::error::{Result, ZeilwerkError};
use zeilwerk_core::types::{LineRecognition, LineStatus, Outcome};

/// All recognition results for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTranscript {
    /// Label of the page (usually the input image file name).
    pub source: String,
    /// Backend ids in report order.
    pub backends: Vec<String>,
    pub generated_at: DateTime<Utc>,
    /// Lines sorted by index.
    pub lines: Vec<LineRecognition>,
}

/// Line counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub lines: usize,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
}

/// Build a transcript: lines sorted by index, and each line's results put in
/// `backend_order`. Results from backends not in `backend_order` keep their
/// relative order after the known ones.
#[instrument(skip(backend_order, results), fields(lines = results.len()))]
pub fn aggregate(
    source_label: &str,
    backend_order: &[String],
    mut results: Vec<LineRecognition>,
) -> PageTranscript {
    results.sort_by_key(|line| line.line.index);
    for line in &mut results {
        line.results.sort_by_key(|r| {
            backend_order
                .iter()
                .position(|id| *id == r.backend)
                .unwrap_or(backend_order.len())
        });
    }
    debug!(backends = backend_order.len(), "Transcript aggregated");

    PageTranscript {
        source: source_label.to_string(),
        backends: backend_order.to_vec(),
        generated_at: Utc::now(),
        lines: results,
    }
}

impl PageTranscript {
    pub fn summary(&self) -> TranscriptSummary {
        let mut summary = TranscriptSummary {
            lines: self.lines.len(),
            ..TranscriptSummary::default()
        };
        for line in &self.lines {
            match line.status() {
                LineStatus::Complete => summary.complete += 1,
                LineStatus::Partial => summary.partial += 1,
                LineStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// The human-readable report: one block per line, one indented entry per
    /// backend.
    ///
    /// ```text
    /// Results for image: line_001.png
    /// 	Model McCATMuS_nfd_nofix_V1:
    /// 	In principio erat verbum
    ///
    /// ```
    pub fn render_report(&self) -> String {
        let mut report = String::new();
        for line in &self.lines {
            report.push_str(&format!("Results for image: {}\n", line.line.label()));
            for result in &line.results {
                report.push_str(&format!("\tModel {}:\n", result.backend));
                match &result.outcome {
                    Outcome::Text(text) => {
                        for row in text.split('\n') {
                            report.push('\t');
                            report.push_str(row);
                            report.push('\n');
                        }
                    }
                    Outcome::Failed(reason) => {
                        report.push_str(&format!("\t<no result: {reason}>\n"));
                    }
                }
                report.push('\n');
            }
        }
        report
    }

    /// One newline-terminated record per line, in line order.
    ///
    /// Text comes from `primary` when it succeeded on that line, otherwise
    /// from the first successful backend. Lines with no text at all still
    /// produce an empty record.
    pub fn flatten(&self, primary: Option<&str>) -> String {
        let mut flat = String::new();
        for line in &self.lines {
            let text = primary
                .and_then(|id| line.outcome(id))
                .and_then(Outcome::text)
                .unwrap_or_else(|| line.text());
            flat.push_str(&text.replace('\n', " "));
            flat.push('\n');
        }
        flat
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Write `contents` to `path` atomically.
///
/// The bytes go to a temporary file in the destination directory, which is
/// flushed, synced, and then renamed over `path`. Readers see either the old
/// file or the complete new one.
#[instrument(skip(contents), fields(path = %path.as_ref().display(), bytes = contents.len()))]
pub fn write_atomic(path: impl AsRef<Path>, contents: &str) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(contents.as_bytes())?;
    staged.flush()?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|err| ZeilwerkError::Io(err.error))?;

    info!("Wrote {}", path.display());
    Ok(())
}
