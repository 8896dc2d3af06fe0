// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// zeilwerk-segment — Page segmentation for the Zeilwerk pipeline.
//
// Provides image loading and cropping, normalization to a binary image
// (Otsu or adaptive thresholding), projection-profile text line detection,
// and extraction of line images to memory or disk.

pub mod image;
pub mod scan;

// Re-export the primary items so callers can use `zeilwerk_segment::detect_lines` etc.
pub use image::processor::ImageProcessor;
pub use scan::detect::{Profile, detect_lines};
pub use scan::extract::{LineImage, OutputTarget, extract_lines, load_lines};
pub use scan::normalize::{BinaryImage, normalize, normalize_path};
