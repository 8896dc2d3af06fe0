// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Line extractor — crops detected intervals out of a page, persists them as
// `line_NNN.<ext>` files, and loads a persisted set back.
//
// Every file the extractor writes is fingerprinted (SHA-256) in a manifest
// next to the lines. A later run may overwrite or remove a file only when its
// current contents still match the manifest, so files the extractor did not
// write are never clobbered.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use zeilwerk_core::config::ExtractConfig;
use zeilwerk_core::error::ZeilwerkError;
use zeilwerk_core::types::{LineId, LineInterval};

use crate::image::processor::ImageProcessor;

/// Name of the manifest file kept inside a lines directory.
pub const MANIFEST_FILENAME: &str = ".zeilwerk-lines.json";

/// Held exclusively while the manifest is read, changed, and stored.
const LOCK_FILENAME: &str = ".zeilwerk-lines.lock";

/// Extensions recognised when re-loading a lines directory.
const LINE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// One cropped text line.
#[derive(Debug, Clone)]
pub struct LineImage {
    pub id: LineId,
    /// Source rows, when the line was cropped in this run.
    pub interval: Option<LineInterval>,
    pub image: DynamicImage,
}

impl LineImage {
    /// 1-based position in reading order.
    pub fn index(&self) -> usize {
        self.id.index
    }

    pub fn path(&self) -> Option<&Path> {
        self.id.path.as_deref()
    }

    pub fn label(&self) -> String {
        self.id.label()
    }
}

/// Where extracted lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Keep crops in memory only.
    Memory,
    /// Persist crops into this directory (created if missing).
    Directory(PathBuf),
}

/// Record of the files a previous extraction wrote, keyed by file name.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LineManifest {
    files: BTreeMap<String, String>,
}

impl LineManifest {
    fn load(dir: &Path) -> Result<Self, ZeilwerkError> {
        let path = dir.join(MANIFEST_FILENAME);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Staged in a uniquely named sibling file and renamed into place.
    fn store(&self, dir: &Path) -> Result<(), ZeilwerkError> {
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(&serde_json::to_vec_pretty(self)?)?;
        staged.flush()?;
        staged
            .persist(dir.join(MANIFEST_FILENAME))
            .map_err(|err| ZeilwerkError::Io(err.error))?;
        Ok(())
    }

    /// Re-read the manifest under the directory lock, apply `change`, and
    /// store the result. Entries added by other extractions into the same
    /// directory are kept.
    fn update(
        dir: &Path,
        change: impl FnOnce(&mut Self) -> Result<(), ZeilwerkError>,
    ) -> Result<(), ZeilwerkError> {
        let _lock = lock_dir(dir)?;
        let mut manifest = Self::load(dir)?;
        change(&mut manifest)?;
        manifest.store(dir)
    }

    fn owns(&self, name: &str, contents: &[u8]) -> bool {
        self.files
            .get(name)
            .is_some_and(|hash| *hash == hash_bytes(contents))
    }
}

/// Exclusive lock on a lines directory; released when the file is dropped.
fn lock_dir(dir: &Path) -> Result<File, ZeilwerkError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILENAME))?;
    file.lock()?;
    Ok(file)
}

/// SHA-256 of `data` as lowercase hex.
fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digits needed so every index up to `last_index` sorts lexically.
pub fn pad_width(last_index: usize, configured: usize) -> usize {
    let digits = last_index.max(1).to_string().len();
    digits.max(configured).max(3)
}

/// File name for a line: `line_007.png`.
pub fn line_filename(index: usize, width: usize, extension: &str) -> String {
    format!("line_{index:0width$}.{extension}")
}

/// Crop each interval out of `source` (full width) and number the crops from
/// `start_index`.
///
/// With [`OutputTarget::Directory`] the crops are also written to disk. All
/// name conflicts are checked before the first file is written, and the
/// manifest records each file as soon as it is written. A run numbered from 1
/// replaces the directory's line set: line files from earlier runs that this
/// run did not rewrite are removed.
#[instrument(skip(source, intervals, config), fields(lines = intervals.len()))]
pub fn extract_lines(
    source: &DynamicImage,
    intervals: &[LineInterval],
    target: &OutputTarget,
    start_index: usize,
    config: &ExtractConfig,
) -> Result<Vec<LineImage>, ZeilwerkError> {
    if start_index == 0 {
        return Err(ZeilwerkError::Config("line numbering starts at 1".into()));
    }
    let height = source.height();
    if let Some(bad) = intervals.iter().find(|i| i.end > height || i.start >= i.end) {
        return Err(ZeilwerkError::Config(format!(
            "interval {bad} lies outside an image of height {height}"
        )));
    }

    let page = ImageProcessor::from_dynamic(source.clone());
    let mut lines: Vec<LineImage> = intervals
        .iter()
        .enumerate()
        .map(|(offset, interval)| LineImage {
            id: LineId::new(start_index + offset, None),
            interval: Some(*interval),
            image: page.crop_rows(interval.start, interval.end).into_dynamic(),
        })
        .collect();

    if let OutputTarget::Directory(dir) = target {
        persist_lines(&mut lines, dir, start_index == 1, config)?;
    }

    info!(lines = lines.len(), "Line extraction complete");
    Ok(lines)
}

fn persist_lines(
    lines: &mut [LineImage],
    dir: &Path,
    replace_set: bool,
    config: &ExtractConfig,
) -> Result<(), ZeilwerkError> {
    std::fs::create_dir_all(dir)?;
    let manifest = LineManifest::load(dir)?;

    let last_index = lines.last().map(|l| l.index()).unwrap_or(0);
    let width = pad_width(last_index, config.pad_width);
    let extension = config.format.extension();
    debug!(width, extension, dir = %dir.display(), "Persisting lines");

    let mut staged = Vec::with_capacity(lines.len());
    for line in lines.iter() {
        let name = line_filename(line.index(), width, extension);
        let bytes = ImageProcessor::from_dynamic(line.image.clone()).to_bytes(config.format)?;
        let path = dir.join(&name);

        match std::fs::read(&path) {
            Ok(existing) if manifest.owns(&name, &existing) => {
                debug!(name, "Overwriting line from a previous run");
            }
            Ok(_) => return Err(ZeilwerkError::OutputConflict(path.display().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        staged.push((name, path, bytes));
    }

    let mut written = BTreeSet::new();
    for (line, (name, path, bytes)) in lines.iter_mut().zip(staged) {
        std::fs::write(&path, &bytes)?;
        let hash = hash_bytes(&bytes);
        LineManifest::update(dir, |manifest| {
            manifest.files.insert(name.clone(), hash);
            Ok(())
        })?;
        line.id.path = Some(path);
        written.insert(name);
    }

    if replace_set {
        LineManifest::update(dir, |manifest| remove_stale_lines(manifest, dir, &written))?;
    }
    Ok(())
}

/// Delete manifest-owned line files not in `keep`.
///
/// A file whose contents changed since it was written is left in place and
/// forgotten by the manifest.
fn remove_stale_lines(
    manifest: &mut LineManifest,
    dir: &Path,
    keep: &BTreeSet<String>,
) -> Result<(), ZeilwerkError> {
    let stale: Vec<String> = manifest
        .files
        .keys()
        .filter(|name| !keep.contains(*name))
        .cloned()
        .collect();

    for name in stale {
        let path = dir.join(&name);
        match std::fs::read(&path) {
            Ok(existing) if manifest.owns(&name, &existing) => {
                std::fs::remove_file(&path)?;
                debug!(name, "Removed line from a previous run");
            }
            Ok(_) => warn!(name, "Line from a previous run was modified; leaving it"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        manifest.files.remove(&name);
    }
    Ok(())
}

/// Parse the index out of `line_<digits>.<image extension>`.
fn parse_line_filename(name: &str) -> Option<usize> {
    let (stem, extension) = name.rsplit_once('.')?;
    if !LINE_EXTENSIONS
        .iter()
        .any(|known| extension.eq_ignore_ascii_case(known))
    {
        return None;
    }
    let digits = stem.strip_prefix("line_")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Load a directory of persisted line images in numeric order.
///
/// Only files named `line_<digits>.<image extension>` are considered, so
/// unrelated files in the same directory are ignored.
#[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
pub fn load_lines(dir: impl AsRef<Path>) -> Result<Vec<LineImage>, ZeilwerkError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ZeilwerkError::InputNotFound(format!(
            "lines directory {}",
            dir.display()
        )));
    }

    let mut candidates: Vec<(usize, String)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(index) = parse_line_filename(&name) {
            candidates.push((index, name));
        }
    }
    candidates.sort();

    let mut lines: Vec<LineImage> = Vec::with_capacity(candidates.len());
    for (index, name) in candidates {
        if lines.last().is_some_and(|l| l.index() == index) {
            warn!(name, index, "Duplicate line index; keeping the first file");
            continue;
        }
        let path = dir.join(&name);
        let image = ImageProcessor::open(&path)?.into_dynamic();
        lines.push(LineImage {
            id: LineId::new(index, Some(path)),
            interval: None,
            image,
        });
    }

    if lines.is_empty() {
        warn!("No line images found");
    } else {
        info!(lines = lines.len(), "Line images loaded");
    }
    Ok(lines)
}
