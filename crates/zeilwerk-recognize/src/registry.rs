// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend registry — builds shared backends from configured `BackendSpec`s.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use zeilwerk_core::config::{BackendSpec, EngineKind};
use zeilwerk_core::error::{Result, ZeilwerkError};

use crate::backend::{RecognitionBackend, SharedBackend, UnavailableBackend};
use crate::engine::CommandBackend;

/// Load the engine selected by `spec.engine`.
pub fn load_backend(spec: &BackendSpec) -> Result<SharedBackend> {
    match &spec.engine {
        EngineKind::Command { .. } => Ok(Arc::new(CommandBackend::load(spec)?)),
        EngineKind::Ocrs => load_ocrs(spec),
    }
}

#[cfg(feature = "ocr")]
fn load_ocrs(spec: &BackendSpec) -> Result<SharedBackend> {
    Ok(Arc::new(crate::engine::OcrsBackend::load(spec)?))
}

#[cfg(not(feature = "ocr"))]
fn load_ocrs(spec: &BackendSpec) -> Result<SharedBackend> {
    Err(ZeilwerkError::backend_unavailable(
        &spec.id,
        "zeilwerk was built without the `ocr` feature",
    ))
}

/// Load every configured backend, preserving configured order.
///
/// With `require_models` the first load failure aborts; a missing model is
/// reported as [`ZeilwerkError::InputNotFound`]. Without it, a failed backend
/// is replaced by an [`UnavailableBackend`] so its column still appears in
/// the report.
#[instrument(skip(specs), fields(backends = specs.len()))]
pub fn load_backends(specs: &[BackendSpec], require_models: bool) -> Result<Vec<SharedBackend>> {
    let mut backends: Vec<SharedBackend> = Vec::with_capacity(specs.len());
    for spec in specs {
        match load_backend(spec) {
            Ok(backend) => backends.push(backend),
            Err(ZeilwerkError::ModelNotFound(model)) if require_models => {
                return Err(ZeilwerkError::InputNotFound(format!(
                    "model {model} for backend {}",
                    spec.id
                )));
            }
            Err(err) if require_models => return Err(err),
            Err(err) => {
                warn!(
                    backend = %spec.id,
                    error = %err,
                    "Backend unavailable, continuing without it"
                );
                backends.push(Arc::new(UnavailableBackend::new(&spec.id, err.to_string())));
            }
        }
    }
    info!(loaded = backends.len(), "Recognition backends ready");
    Ok(backends)
}
