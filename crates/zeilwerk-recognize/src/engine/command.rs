// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External command backend — runs a recognition CLI (kraken by default) once
// per line image.
//
// The argument template may use three placeholders:
//
// - `{input}`: path of the line image (staged as PNG when the line only
//   lives in memory)
// - `{output}`: path of a scratch file the tool writes its text to; when the
//   template has no `{output}`, stdout is read instead
// - `{model}`: the configured model path or name

use std::path::Path;
use std::process::Command;

use image::ImageFormat;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};
use zeilwerk_core::config::{BackendSpec, EngineKind};
use zeilwerk_core::error::{Result, ZeilwerkError};
use zeilwerk_segment::LineImage;

use crate::backend::RecognitionBackend;

const INPUT: &str = "{input}";
const OUTPUT: &str = "{output}";
const MODEL: &str = "{model}";

/// A backend that shells out to an external recognizer.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    id: String,
    program: String,
    args: Vec<String>,
    model: String,
}

impl CommandBackend {
    fn writes_output_file(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(OUTPUT))
    }

    /// Substitute the placeholders in every template argument.
    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT, &input)
                    .replace(OUTPUT, &output)
                    .replace(MODEL, &self.model)
            })
            .collect()
    }

    fn unavailable(&self, reason: impl Into<String>) -> ZeilwerkError {
        ZeilwerkError::backend_unavailable(&self.id, reason)
    }
}

/// A model given as a path must exist; bare names are resolved by the tool.
fn looks_like_path(model: &str) -> bool {
    model.contains('/') || model.contains('\\')
}

/// Write an in-memory line to a temporary PNG the external tool can read.
fn stage_line(line: &LineImage) -> Result<NamedTempFile> {
    let staged = tempfile::Builder::new()
        .prefix("zeilwerk-line-")
        .suffix(".png")
        .tempfile()?;
    line.image
        .save_with_format(staged.path(), ImageFormat::Png)
        .map_err(|err| {
            ZeilwerkError::ImageEncode(format!("failed to stage {}: {}", line.label(), err))
        })?;
    Ok(staged)
}

impl RecognitionBackend for CommandBackend {
    fn load(spec: &BackendSpec) -> Result<Self> {
        let EngineKind::Command { program, args } = &spec.engine else {
            return Err(ZeilwerkError::Config(format!(
                "backend {} is not a command backend",
                spec.id
            )));
        };
        if program.trim().is_empty() {
            return Err(ZeilwerkError::Config(format!(
                "backend {} names no program",
                spec.id
            )));
        }
        if looks_like_path(&spec.model) && !Path::new(&spec.model).exists() {
            return Err(ZeilwerkError::ModelNotFound(spec.model.clone()));
        }

        debug!(id = %spec.id, program = %program, "Command backend ready");
        Ok(Self {
            id: spec.id.clone(),
            program: program.clone(),
            args: args.clone(),
            model: spec.model.clone(),
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip_all, fields(backend = %self.id, line = line.index()))]
    fn run(&self, line: &LineImage) -> Result<String> {
        // Staged input and scratch directory must outlive the child process.
        let staged;
        let input: &Path = match line.path() {
            Some(path) => path,
            None => {
                staged = stage_line(line)?;
                staged.path()
            }
        };
        let scratch = tempfile::Builder::new().prefix("zeilwerk-out-").tempdir()?;
        let output = scratch.path().join("line.txt");

        let args = self.render_args(input, &output);
        debug!(program = %self.program, ?args, "Invoking recognizer");

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|err| {
                self.unavailable(format!("failed to start {}: {}", self.program, err))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(self.unavailable(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        let text = if self.writes_output_file() {
            std::fs::read_to_string(&output).map_err(|err| {
                self.unavailable(format!("no output written to {}: {}", output.display(), err))
            })?
        } else {
            String::from_utf8_lossy(&result.stdout).into_owned()
        };

        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }
}
