// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the command line.
//
// Every technical error is mapped to plain English with a clear suggestion.

use crate::error::ZeilwerkError;

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary.
    pub message: String,
    /// What the user should try.
    pub suggestion: String,
}

impl std::fmt::Display for HumanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n  hint: {}", self.message, self.suggestion)
    }
}

/// Convert a `ZeilwerkError` into a `HumanError` suitable for terminal output.
pub fn humanize_error(err: &ZeilwerkError) -> HumanError {
    match err {
        ZeilwerkError::InputNotFound(what) => HumanError {
            message: format!("Could not find {what}."),
            suggestion: "Check the path for typos and make sure the file is readable.".into(),
        },

        ZeilwerkError::UnsupportedFormat(detail) => HumanError {
            message: "The page image could not be read as pixels.".into(),
            suggestion: format!(
                "Convert the scan to PNG or TIFF and try again. ({detail})"
            ),
        },

        ZeilwerkError::ModelNotFound(model) => HumanError {
            message: format!("Recognition model {model} is not installed."),
            suggestion: "Download the model or pass its full path to --backend. \
                         Set require_models to false to continue without it."
                .into(),
        },

        ZeilwerkError::BackendUnavailable { backend, reason } => HumanError {
            message: format!("Backend {backend} did not produce text."),
            suggestion: format!(
                "The line is kept in the report with no result from this backend. ({reason})"
            ),
        },

        ZeilwerkError::OutputConflict(path) => HumanError {
            message: format!("{path} already exists and was not written by zeilwerk."),
            suggestion: "Choose an empty lines directory or move the existing file away.".into(),
        },

        ZeilwerkError::ImageEncode(detail) => HumanError {
            message: "An image could not be written.".into(),
            suggestion: format!("Check free disk space and the output format. ({detail})"),
        },

        ZeilwerkError::Config(detail) => HumanError {
            message: "The configuration is not valid.".into(),
            suggestion: detail.clone(),
        },

        ZeilwerkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::PermissionDenied => HumanError {
                message: "Permission denied while reading or writing a file.".into(),
                suggestion: "Check that the output directories are writable.".into(),
            },
            _ => HumanError {
                message: "A file operation failed.".into(),
                suggestion: format!("{io_err}"),
            },
        },

        ZeilwerkError::Serialization(detail) => HumanError {
            message: "A JSON document could not be read or written.".into(),
            suggestion: format!("Check the configuration file syntax. ({detail})"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_names_the_path() {
        let human = humanize_error(&ZeilwerkError::InputNotFound("page.png".into()));
        assert!(human.message.contains("page.png"));
    }

    #[test]
    fn backend_failure_keeps_the_reason() {
        let err = ZeilwerkError::backend_unavailable("McCATMuS", "timed out");
        let human = humanize_error(&err);
        assert!(human.message.contains("McCATMuS"));
        assert!(human.suggestion.contains("timed out"));
    }

    #[test]
    fn display_includes_hint() {
        let human = humanize_error(&ZeilwerkError::Config("fraction must be in (0, 1]".into()));
        let rendered = human.to_string();
        assert!(rendered.contains("hint: fraction must be in (0, 1]"));
    }
}
