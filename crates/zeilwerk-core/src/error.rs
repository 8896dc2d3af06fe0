// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Zeilwerk.

use thiserror::Error;

/// Top-level error type for all Zeilwerk operations.
#[derive(Debug, Error)]
pub enum ZeilwerkError {
    // -- Input errors --
    #[error("input not found: {0}")]
    InputNotFound(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    // -- Recognition backends --
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),

    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    // -- Output --
    #[error("refusing to overwrite {0}: not written by a previous run")]
    OutputConflict(String),

    #[error("image encoding failed: {0}")]
    ImageEncode(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ZeilwerkError {
    /// Shorthand for a [`ZeilwerkError::BackendUnavailable`].
    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ZeilwerkError>;
