// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded recognition backend using the `ocrs` crate, a pure-Rust OCR engine
// backed by neural network models executed via `rten`.
//
// # Feature Gate
//
// This module is only available when the `ocr` feature is enabled:
//
// ```toml
// zeilwerk-recognize = { path = "crates/zeilwerk-recognize", features = ["ocr"] }
// ```
//
// # Model Setup
//
// A backend's `model` names a directory containing two model files:
//
// - **Detection model** (`text-detection.rten`): locates text regions.
// - **Recognition model** (`text-recognition.rten`): decodes characters.
//
// An empty `model` falls back to the `ocrs-cli` cache directory,
// `$XDG_CACHE_HOME/ocrs` (typically `~/.cache/ocrs`).

use std::path::{Path, PathBuf};

use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, info, instrument};
use zeilwerk_core::config::{BackendSpec, EngineKind};
use zeilwerk_core::error::{Result, ZeilwerkError};
use zeilwerk_segment::LineImage;

use crate::backend::RecognitionBackend;

/// Well-known filenames for the detection and recognition models.
const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// Default directory for cached model files.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Locations of the two model files an [`OcrsBackend`] needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrsModels {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl OcrsModels {
    /// Expect `text-detection.rten` and `text-recognition.rten` inside `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection: dir.join(DETECTION_MODEL_FILENAME),
            recognition: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    /// Resolve the configured model string; empty means the default cache.
    pub fn from_spec(model: &str) -> Self {
        if model.trim().is_empty() {
            Self::from_dir(default_model_dir())
        } else {
            Self::from_dir(model)
        }
    }

    /// Verify that both model files exist.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection, &self.recognition] {
            if !path.exists() {
                return Err(ZeilwerkError::ModelNotFound(format!(
                    "{}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Recognition backend running the `ocrs` engine in-process.
///
/// Model loading is the expensive step; the dispatcher shares one loaded
/// backend across all lines.
///
/// **Important:** `ocrs` and `rten` must be compiled in release mode. Debug
/// builds are 10-100x slower.
pub struct OcrsBackend {
    id: String,
    engine: OcrEngine,
}

impl OcrsBackend {
    fn engine_error(&self, context: &str, err: impl std::fmt::Display) -> ZeilwerkError {
        ZeilwerkError::backend_unavailable(&self.id, format!("{context}: {err}"))
    }

    /// Run detection and recognition over one image, joining the recognised
    /// text lines with newlines.
    fn recognize_text(&self, image: &DynamicImage) -> Result<String> {
        // ocrs expects RGB8.
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
            .map_err(|err| self.engine_error(&format!("image source ({width}x{height})"), err))?;

        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| self.engine_error("preprocessing failed", err))?;

        let text = self
            .engine
            .get_text(&input)
            .map_err(|err| self.engine_error("recognition failed", err))?;

        debug!(
            line_count = text.lines().count(),
            char_count = text.len(),
            "OCR recognition complete"
        );
        Ok(text)
    }
}

impl RecognitionBackend for OcrsBackend {
    #[instrument(skip_all, fields(id = %spec.id))]
    fn load(spec: &BackendSpec) -> Result<Self> {
        if spec.engine != EngineKind::Ocrs {
            return Err(ZeilwerkError::Config(format!(
                "backend {} is not an ocrs backend",
                spec.id
            )));
        }
        let models = OcrsModels::from_spec(&spec.model);
        models.validate()?;

        info!(path = %models.detection.display(), "Loading OCR detection model");
        let detection_model = Model::load_file(&models.detection).map_err(|err| {
            ZeilwerkError::ModelNotFound(format!(
                "failed to load detection model from {}: {}",
                models.detection.display(),
                err
            ))
        })?;

        info!(path = %models.recognition.display(), "Loading OCR recognition model");
        let recognition_model = Model::load_file(&models.recognition).map_err(|err| {
            ZeilwerkError::ModelNotFound(format!(
                "failed to load recognition model from {}: {}",
                models.recognition.display(),
                err
            ))
        })?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| {
            ZeilwerkError::backend_unavailable(
                &spec.id,
                format!("failed to initialise OCR engine: {err}"),
            )
        })?;

        info!("OCR engine initialised successfully");
        Ok(Self {
            id: spec.id.clone(),
            engine,
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip_all, fields(backend = %self.id, line = line.index()))]
    fn run(&self, line: &LineImage) -> Result<String> {
        let text = self.recognize_text(&line.image)?;
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }
}
