// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Segmentation pipeline — binarization, projection-profile line detection,
// and line extraction.

pub mod detect;
pub mod extract;
pub mod normalize;

pub use detect::{Profile, detect_lines, horizontal_profile};
pub use extract::{LineImage, OutputTarget, extract_lines, load_lines};
pub use normalize::{BinaryImage, normalize, normalize_path};
