// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The recognition backend capability shared by every engine.

use std::sync::Arc;

use zeilwerk_core::config::BackendSpec;
use zeilwerk_core::error::{Result, ZeilwerkError};
use zeilwerk_segment::LineImage;

/// A recognition engine bound to one loaded model.
///
/// Implementations hold their model immutably after [`load`](Self::load), so
/// a single instance can serve concurrent [`run`](Self::run) calls from the
/// dispatcher's worker threads.
pub trait RecognitionBackend: Send + Sync {
    /// Resolve and load the model named by `spec`.
    ///
    /// # Errors
    ///
    /// [`ZeilwerkError::ModelNotFound`] when the model cannot be resolved.
    fn load(spec: &BackendSpec) -> Result<Self>
    where
        Self: Sized;

    /// Identifier used in reports; matches [`BackendSpec::id`].
    fn id(&self) -> &str;

    /// Recognize the text of a single line image.
    fn run(&self, line: &LineImage) -> Result<String>;
}

/// Backends are shared between the dispatcher's tasks.
pub type SharedBackend = Arc<dyn RecognitionBackend>;

/// Placeholder for a backend whose model failed to load.
///
/// Every run reports [`ZeilwerkError::BackendUnavailable`] with the original
/// load failure, so the line still appears in the report for this backend.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    id: String,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl RecognitionBackend for UnavailableBackend {
    fn load(spec: &BackendSpec) -> Result<Self> {
        Ok(Self::new(&spec.id, "model was not loaded"))
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn run(&self, _line: &LineImage) -> Result<String> {
        Err(ZeilwerkError::backend_unavailable(&self.id, &self.reason))
    }
}
