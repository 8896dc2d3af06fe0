// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline orchestration — one page from input image to written transcripts.
//
// Stages run strictly in order: normalize, detect, extract, recognize,
// aggregate. Every stage receives its configuration explicitly from the
// `PipelineConfig` the pipeline was built with.

use std::path::{Path, PathBuf};

use image::{DynamicImage, imageops};
use tracing::{info, instrument, warn};
use zeilwerk_core::config::PipelineConfig;
use zeilwerk_core::error::{Result, ZeilwerkError};
use zeilwerk_recognize::{
    CancelHandle, Dispatcher, PageTranscript, SharedBackend, aggregate, load_backends,
    write_atomic,
};
use zeilwerk_segment::{
    BinaryImage, LineImage, OutputTarget, detect_lines, extract_lines, load_lines,
    normalize_path,
};

/// Where a run writes its artefacts. `None` skips that output.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    /// The normalized page.
    pub binarized: Option<PathBuf>,
    /// Persisted line images; lines stay in memory when unset.
    pub lines_dir: Option<PathBuf>,
    /// Human-readable per-line, per-backend report.
    pub report: Option<PathBuf>,
    /// Flattened transcript, one line of text per detected line.
    pub text: Option<PathBuf>,
    /// Full transcript as JSON.
    pub json: Option<PathBuf>,
}

/// How a run ended when no fatal error occurred.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(PageTranscript),
    /// The page held no detectable text lines; nothing was recognized.
    NoLines,
}

pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancelHandle,
}

impl Pipeline {
    /// Build a pipeline, rejecting invalid configuration up front.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelHandle::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cancels recognition of lines that have not started yet.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Load the configured recognition backends.
    pub fn load_backends(&self) -> Result<Vec<SharedBackend>> {
        if self.config.backends.is_empty() {
            return Err(ZeilwerkError::Config(
                "no recognition backends configured; pass --backend".into(),
            ));
        }
        load_backends(&self.config.backends, self.config.require_models)
    }

    /// Normalize, detect, and extract. An empty result means no lines.
    #[instrument(skip(self, outputs), fields(input = %input.display()))]
    pub fn segment(&self, input: &Path, outputs: &OutputPaths) -> Result<Vec<LineImage>> {
        let binary = normalize_path(input, &self.config.normalize)?;
        if let Some(path) = &outputs.binarized {
            binary.save(path)?;
            info!(path = %path.display(), "Binarized page written");
        }

        let intervals = detect_lines(&binary, &self.config.detect);
        if intervals.is_empty() {
            warn!("No text lines detected");
            return Ok(Vec::new());
        }

        let target = match &outputs.lines_dir {
            Some(dir) => OutputTarget::Directory(dir.clone()),
            None => OutputTarget::Memory,
        };
        extract_lines(
            &recognition_page(&binary),
            &intervals,
            &target,
            1,
            &self.config.extract,
        )
    }

    /// Dispatch `lines` to `backends`, aggregate, and write the outputs.
    #[instrument(skip(self, lines, backends, outputs), fields(lines = lines.len()))]
    pub async fn recognize(
        &self,
        source_label: &str,
        lines: Vec<LineImage>,
        backends: Vec<SharedBackend>,
        outputs: &OutputPaths,
    ) -> Result<PageTranscript> {
        let dispatcher = Dispatcher::new(backends, &self.config.dispatch)
            .with_cancel_handle(self.cancel.clone());
        let order = dispatcher.backend_ids();
        let results = dispatcher.recognize_all(lines).await;

        let transcript = aggregate(source_label, &order, results);
        self.write_outputs(&transcript, outputs)?;

        let summary = transcript.summary();
        info!(
            lines = summary.lines,
            complete = summary.complete,
            partial = summary.partial,
            failed = summary.failed,
            "Page recognized"
        );
        Ok(transcript)
    }

    /// Full run over one page image with the configured backends.
    ///
    /// Backends load before the page is read, so a missing model stops the
    /// run before any output is written.
    pub async fn run(&self, input: &Path, outputs: &OutputPaths) -> Result<PipelineOutcome> {
        require_file(input)?;
        let backends = self.load_backends()?;
        self.run_with_backends(input, outputs, backends).await
    }

    /// Full run with already-loaded backends.
    #[instrument(skip(self, outputs, backends), fields(input = %input.display()))]
    pub async fn run_with_backends(
        &self,
        input: &Path,
        outputs: &OutputPaths,
        backends: Vec<SharedBackend>,
    ) -> Result<PipelineOutcome> {
        let lines = self.segment(input, outputs)?;
        if lines.is_empty() {
            return Ok(PipelineOutcome::NoLines);
        }
        let transcript = self
            .recognize(&file_label(input), lines, backends, outputs)
            .await?;
        Ok(PipelineOutcome::Completed(transcript))
    }

    /// Recognition only, over a directory of previously extracted lines.
    #[instrument(skip(self, outputs), fields(dir = %lines_dir.display()))]
    pub async fn recognize_dir(
        &self,
        lines_dir: &Path,
        outputs: &OutputPaths,
    ) -> Result<PipelineOutcome> {
        let backends = self.load_backends()?;
        let lines = load_lines(lines_dir)?;
        if lines.is_empty() {
            return Ok(PipelineOutcome::NoLines);
        }
        let transcript = self
            .recognize(&file_label(lines_dir), lines, backends, outputs)
            .await?;
        Ok(PipelineOutcome::Completed(transcript))
    }

    fn write_outputs(&self, transcript: &PageTranscript, outputs: &OutputPaths) -> Result<()> {
        if let Some(path) = &outputs.report {
            write_atomic(path, &transcript.render_report())?;
        }
        if let Some(path) = &outputs.text {
            let primary = self.config.primary_backend.as_deref();
            write_atomic(path, &transcript.flatten(primary))?;
        }
        if let Some(path) = &outputs.json {
            write_atomic(path, &transcript.to_json()?)?;
        }
        Ok(())
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ZeilwerkError::InputNotFound(format!(
            "input image {}",
            path.display()
        )))
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// The page handed to recognizers: dark ink on a light background.
fn recognition_page(binary: &BinaryImage) -> DynamicImage {
    let mut page = binary.ink_mask();
    imageops::invert(&mut page);
    DynamicImage::ImageLuma8(page)
}
