// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZeilwerkError};

/// Everything one pipeline run needs, passed explicitly into each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub normalize: NormalizeConfig,
    pub detect: DetectConfig,
    pub extract: ExtractConfig,
    pub dispatch: DispatchConfig,
    /// Recognition backends, in report order.
    pub backends: Vec<BackendSpec>,
    /// Backend whose text feeds the flattened transcript. Falls back to the
    /// first successful backend per line.
    pub primary_backend: Option<String>,
    /// Treat a model that fails to load as fatal instead of recording
    /// every line as unavailable for that backend.
    pub require_models: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalize: NormalizeConfig::default(),
            detect: DetectConfig::default(),
            extract: ExtractConfig::default(),
            dispatch: DispatchConfig::default(),
            backends: Vec::new(),
            primary_backend: None,
            require_models: true,
        }
    }
}

impl PipelineConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ZeilwerkError::InputNotFound(format!("config file {}", path.display()))
            } else {
                ZeilwerkError::Io(err)
            }
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.detect.validate()?;

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(ZeilwerkError::Config("backend id must not be empty".into()));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(ZeilwerkError::Config(format!(
                    "duplicate backend id {}",
                    backend.id
                )));
            }
        }

        if let Some(primary) = &self.primary_backend {
            if !seen.contains(primary.as_str()) {
                return Err(ZeilwerkError::Config(format!(
                    "primary backend {primary} is not among the configured backends"
                )));
            }
        }

        if self.dispatch.max_workers == 0 {
            return Err(ZeilwerkError::Config("max_workers must be at least 1".into()));
        }
        Ok(())
    }
}

// -- Normalizer ---------------------------------------------------------------

/// Which pixel value counts as ink in an image that is already two-valued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InkPolarity {
    /// The less frequent value is ink; ties go to the brighter value.
    #[default]
    Auto,
    /// The brighter value is ink (white text on black).
    Bright,
    /// The darker value is ink (black text on white).
    Dark,
}

/// How a non-binary image is turned into ink and background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarizeMethod {
    /// Global threshold from the image histogram.
    #[default]
    Otsu,
    /// Local mean threshold over a `block_radius` neighbourhood, minus `c`.
    Adaptive { block_radius: u32, c: i32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub method: BinarizeMethod,
    pub polarity: InkPolarity,
    /// Remove isolated ink specks after thresholding.
    pub despeckle: bool,
}

// -- Line detector ------------------------------------------------------------

/// How the row-sum threshold separating text from gaps is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// `fraction * max(profile)`
    FractionOfMax,
    /// `mean_multiple * mean(profile)`
    MultipleOfMean,
    /// The larger of the two.
    #[default]
    MaxOfBoth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Intervals shorter than this many rows are discarded.
    pub min_line_height: u32,
    pub threshold_policy: ThresholdPolicy,
    pub fraction: f64,
    pub mean_multiple: f64,
    /// Dilate the ink mask with a 3x3 square before profiling.
    pub dilate: bool,
    /// Bridge background gaps shorter than `min_line_height`.
    pub merge_small_gaps: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            min_line_height: 3,
            threshold_policy: ThresholdPolicy::MaxOfBoth,
            fraction: 0.2,
            mean_multiple: 1.0,
            dilate: false,
            merge_small_gaps: false,
        }
    }
}

impl DetectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_line_height == 0 {
            return Err(ZeilwerkError::Config("min_line_height must be positive".into()));
        }
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(ZeilwerkError::Config(format!(
                "fraction must be in (0, 1], got {}",
                self.fraction
            )));
        }
        if !(self.mean_multiple.is_finite() && self.mean_multiple > 0.0) {
            return Err(ZeilwerkError::Config(format!(
                "mean_multiple must be positive, got {}",
                self.mean_multiple
            )));
        }
        Ok(())
    }
}

// -- Line extractor -----------------------------------------------------------

/// Encoding used for persisted line images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineFormat {
    #[default]
    Png,
    Tiff,
    Bmp,
}

impl LineFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Tiff => "tif",
            Self::Bmp => "bmp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub format: LineFormat,
    /// Minimum number of digits in `line_NNN`. Never below 3.
    pub pad_width: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            format: LineFormat::Png,
            pad_width: 3,
        }
    }
}

// -- Dispatcher ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on concurrent backend invocations.
    pub max_workers: usize,
    /// Per-invocation timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            timeout_ms: None,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// -- Backends -----------------------------------------------------------------

/// Which engine implementation serves a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineKind {
    /// An external recognition CLI invoked once per line image.
    ///
    /// `args` may contain `{input}`, `{output}` and `{model}` placeholders.
    /// When `{output}` is present the text is read from that file,
    /// otherwise from stdout.
    Command { program: String, args: Vec<String> },
    /// The embedded `ocrs` engine. `model` names a directory holding
    /// `text-detection.rten` and `text-recognition.rten`.
    Ocrs,
}

impl EngineKind {
    /// The kraken CLI invocation used by the original scripts.
    pub fn kraken() -> Self {
        Self::Command {
            program: "kraken".into(),
            args: ["-i", "{input}", "{output}", "ocr", "-m", "{model}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Extensions stripped when deriving a backend id from a model path.
const MODEL_EXTENSIONS: &[&str] = &["mlmodel", "safetensors", "rten", "onnx", "traineddata"];

/// One configured recognition backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Label used in reports and for `primary_backend`.
    pub id: String,
    pub engine: EngineKind,
    /// Model path or registry identifier handed to the engine.
    pub model: String,
}

impl BackendSpec {
    /// Parse a CLI shorthand: `kraken:<model>`, `ocrs:<model-dir>`, or a
    /// bare model name or path (kraken), including Windows drive paths. The
    /// id is the model's file stem.
    pub fn parse(shorthand: &str) -> Result<Self> {
        let (engine, model) = match shorthand.split_once(':') {
            Some(("kraken", model)) => (EngineKind::kraken(), model),
            Some(("ocrs", model)) => (EngineKind::Ocrs, model),
            Some((drive, rest)) if is_drive_path(drive, rest) => {
                (EngineKind::kraken(), shorthand)
            }
            Some((other, _)) if !other.contains(['/', '\\', '.']) => {
                return Err(ZeilwerkError::Config(format!(
                    "unknown engine {other} in backend {shorthand}"
                )));
            }
            _ => (EngineKind::kraken(), shorthand),
        };
        if model.is_empty() {
            return Err(ZeilwerkError::Config(format!(
                "backend {shorthand} names no model"
            )));
        }
        Ok(Self {
            id: model_id(model),
            engine,
            model: model.to_string(),
        })
    }
}

/// `C:\models` or `C:/models`: one drive letter, then a separator.
fn is_drive_path(prefix: &str, rest: &str) -> bool {
    prefix.len() == 1
        && prefix.bytes().all(|b| b.is_ascii_alphabetic())
        && rest.starts_with(['/', '\\'])
}

/// Last path component of `model`, without a known model extension. Both
/// separators are honoured regardless of platform.
fn model_id(model: &str) -> String {
    let trimmed = model.trim_end_matches(['/', '\\']);
    let file_name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext)) if MODEL_EXTENSIONS.contains(&ext) => stem,
        _ => file_name,
    };
    if stem.is_empty() {
        model.to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn detect_defaults_match_reference_values() {
        let detect = DetectConfig::default();
        assert_eq!(detect.threshold_policy, ThresholdPolicy::MaxOfBoth);
        assert_eq!(detect.fraction, 0.2);
        assert_eq!(detect.mean_multiple, 1.0);
    }

    #[test]
    fn fraction_out_of_range_is_rejected() {
        let mut config = PipelineConfig::default();
        config.detect.fraction = 1.5;
        assert!(matches!(config.validate(), Err(ZeilwerkError::Config(_))));
    }

    #[test]
    fn duplicate_backend_ids_are_rejected() {
        let mut config = PipelineConfig::default();
        let spec = BackendSpec::parse("kraken:McCATMuS_nfd_nofix_V1").expect("parse");
        config.backends = vec![spec.clone(), spec];
        assert!(config.validate().is_err());
    }

    #[test]
    fn primary_must_be_configured() {
        let mut config = PipelineConfig::default();
        config.backends = vec![BackendSpec::parse("model-a").expect("parse")];
        config.primary_backend = Some("model-b".into());
        assert!(config.validate().is_err());

        config.primary_backend = Some("model-a".into());
        config.validate().expect("primary present");
    }

    #[test]
    fn parse_backend_shorthand() {
        let kraken = BackendSpec::parse("kraken:models/McCATMuS_nfd_nofix_V1.mlmodel")
            .expect("parse");
        assert_eq!(kraken.id, "McCATMuS_nfd_nofix_V1");
        assert_eq!(kraken.engine, EngineKind::kraken());

        let bare = BackendSpec::parse("bdd-wormser-scriptorium-abbreviated-0.2").expect("parse");
        assert_eq!(bare.model, "bdd-wormser-scriptorium-abbreviated-0.2");
        assert_eq!(bare.id, "bdd-wormser-scriptorium-abbreviated-0.2");
        assert!(matches!(bare.engine, EngineKind::Command { .. }));

        let ocrs = BackendSpec::parse("ocrs:/opt/models").expect("parse");
        assert_eq!(ocrs.engine, EngineKind::Ocrs);
        assert_eq!(ocrs.id, "models");

        assert!(BackendSpec::parse("tesseract:eng").is_err());
        assert!(BackendSpec::parse("kraken:").is_err());
    }

    #[test]
    fn parse_windows_model_paths() {
        let bare = BackendSpec::parse("C:\\models\\x.mlmodel").expect("drive path");
        assert_eq!(bare.model, "C:\\models\\x.mlmodel");
        assert_eq!(bare.id, "x");
        assert!(matches!(bare.engine, EngineKind::Command { .. }));

        let forward = BackendSpec::parse("d:/models/McCATMuS.mlmodel").expect("drive path");
        assert_eq!(forward.id, "McCATMuS");

        let prefixed = BackendSpec::parse("kraken:C:\\models\\x.mlmodel").expect("prefixed");
        assert_eq!(prefixed.model, "C:\\models\\x.mlmodel");
        assert_eq!(prefixed.id, "x");

        assert!(BackendSpec::parse("x:model").is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = r#"{
            "detect": { "threshold_policy": "fraction_of_max", "fraction": 0.3 },
            "backends": [
                { "id": "k", "engine": { "kind": "ocrs" }, "model": "/m" }
            ],
            "primary_backend": "k"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.detect.threshold_policy, ThresholdPolicy::FractionOfMax);
        assert_eq!(config.detect.fraction, 0.3);
        assert_eq!(config.detect.min_line_height, 3);
        assert_eq!(config.backends[0].engine, EngineKind::Ocrs);
        config.validate().expect("valid");
    }

    #[test]
    fn missing_config_file_is_input_not_found() {
        let result = PipelineConfig::from_json_file("/nonexistent/zeilwerk.json");
        assert!(matches!(result, Err(ZeilwerkError::InputNotFound(_))));
    }
}
