// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Line detector — horizontal projection profile over a binary page and the
// row scan that turns it into text line intervals.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use tracing::{debug, info, instrument};
use zeilwerk_core::config::{DetectConfig, ThresholdPolicy};
use zeilwerk_core::types::LineInterval;

use crate::scan::normalize::{BinaryImage, INK};

/// Per-row count of ink pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(Vec<u32>);

impl Profile {
    /// Count [`INK`] pixels in each row of a canonical ink mask.
    pub fn from_mask(mask: &GrayImage) -> Self {
        let mut rows = vec![0u32; mask.height() as usize];
        for (_, y, pixel) in mask.enumerate_pixels() {
            if pixel.0[0] == INK {
                rows[y as usize] += 1;
            }
        }
        Self(rows)
    }

    pub fn values(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn max(&self) -> u32 {
        self.0.iter().copied().max().unwrap_or(0)
    }

    pub fn mean(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.0.iter().map(|&v| v as u64).sum();
        sum as f64 / self.0.len() as f64
    }
}

/// Row-sum profile of a binary image, optionally after a 3x3 dilation that
/// joins the strokes of one line into a contiguous band.
pub fn horizontal_profile(binary: &BinaryImage, dilate_first: bool) -> Profile {
    let mask = binary.ink_mask();
    if dilate_first {
        Profile::from_mask(&dilate(&mask, Norm::LInf, 1))
    } else {
        Profile::from_mask(&mask)
    }
}

/// The row-sum value a row must strictly exceed to count as text.
pub fn line_threshold(profile: &Profile, config: &DetectConfig) -> f64 {
    let of_max = config.fraction * profile.max() as f64;
    let of_mean = config.mean_multiple * profile.mean();
    match config.threshold_policy {
        ThresholdPolicy::FractionOfMax => of_max,
        ThresholdPolicy::MultipleOfMean => of_mean,
        ThresholdPolicy::MaxOfBoth => of_max.max(of_mean),
    }
}

/// Detect text lines in a binary page.
///
/// Returns half-open row intervals in top-to-bottom order. An empty vector
/// means no row rose above the threshold, which callers treat as "no lines",
/// not as a failure.
#[instrument(skip_all, fields(width = binary.width(), height = binary.height()))]
pub fn detect_lines(binary: &BinaryImage, config: &DetectConfig) -> Vec<LineInterval> {
    let profile = horizontal_profile(binary, config.dilate);
    let threshold = line_threshold(&profile, config);
    debug!(
        max = profile.max(),
        mean = profile.mean(),
        threshold,
        policy = ?config.threshold_policy,
        "Profile computed"
    );

    let mut intervals = scan_profile(&profile, threshold);
    if config.merge_small_gaps {
        intervals = merge_small_gaps(intervals, config.min_line_height);
    }

    let before = intervals.len();
    intervals.retain(|interval| interval.height() >= config.min_line_height);
    debug!(
        dropped = before - intervals.len(),
        min_line_height = config.min_line_height,
        "Short intervals discarded"
    );

    info!(lines = intervals.len(), "Line detection complete");
    intervals
}

/// Walk the profile top to bottom, opening an interval when a row rises
/// strictly above `threshold` and closing it at the first row that does not.
///
/// A line still open after the last row is closed at the image height.
fn scan_profile(profile: &Profile, threshold: f64) -> Vec<LineInterval> {
    let mut intervals = Vec::new();
    let mut start: Option<u32> = None;

    for (row, &sum) in profile.values().iter().enumerate() {
        let row = row as u32;
        let above = sum as f64 > threshold;
        match (start, above) {
            (None, true) => start = Some(row),
            (Some(open), false) => {
                intervals.push(LineInterval {
                    start: open,
                    end: row,
                });
                start = None;
            }
            _ => {}
        }
    }

    if let Some(open) = start {
        intervals.push(LineInterval {
            start: open,
            end: profile.len() as u32,
        });
    }

    intervals
}

/// Join neighbours separated by fewer than `max_gap` background rows.
fn merge_small_gaps(intervals: Vec<LineInterval>, max_gap: u32) -> Vec<LineInterval> {
    let mut merged: Vec<LineInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start - last.end < max_gap => last.end = interval.end,
            _ => merged.push(interval),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    use crate::scan::normalize::BACKGROUND;

    /// Binary image with ink covering `coverage` columns of each band's rows.
    fn banded(width: u32, height: u32, bands: &[(u32, u32, u32)]) -> BinaryImage {
        let img = GrayImage::from_fn(width, height, |x, y| {
            let inked = bands
                .iter()
                .any(|&(start, end, coverage)| (start..end).contains(&y) && x < coverage);
            Luma([if inked { INK } else { BACKGROUND }])
        });
        BinaryImage::new(img, INK).expect("two-valued")
    }

    fn fraction_of_max(fraction: f64) -> DetectConfig {
        DetectConfig {
            threshold_policy: ThresholdPolicy::FractionOfMax,
            fraction,
            ..DetectConfig::default()
        }
    }

    fn assert_ordered_and_disjoint(intervals: &[LineInterval]) {
        for pair in intervals.windows(2) {
            assert!(pair[0].end <= pair[1].start, "{} overlaps {}", pair[0], pair[1]);
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn two_bands_yield_exact_intervals() {
        let binary = banded(100, 40, &[(5, 15, 100), (25, 35, 100)]);
        let intervals = detect_lines(&binary, &fraction_of_max(0.2));
        assert_eq!(
            intervals,
            vec![
                LineInterval { start: 5, end: 15 },
                LineInterval { start: 25, end: 35 },
            ]
        );
    }

    #[test]
    fn default_policy_uses_larger_threshold() {
        let binary = banded(100, 40, &[(5, 15, 100), (25, 35, 100)]);
        let profile = horizontal_profile(&binary, false);
        assert_eq!(profile.max(), 100);
        assert_eq!(profile.mean(), 50.0);

        let config = DetectConfig::default();
        assert_eq!(line_threshold(&profile, &config), 50.0);
        assert_eq!(line_threshold(&profile, &fraction_of_max(0.2)), 20.0);

        let mean_only = DetectConfig {
            threshold_policy: ThresholdPolicy::MultipleOfMean,
            mean_multiple: 0.5,
            ..DetectConfig::default()
        };
        assert_eq!(line_threshold(&profile, &mean_only), 25.0);
        assert_eq!(detect_lines(&binary, &config).len(), 2);
    }

    #[test]
    fn band_touching_bottom_edge_is_closed() {
        let binary = banded(50, 30, &[(4, 10, 50), (22, 30, 50)]);
        let intervals = detect_lines(&binary, &fraction_of_max(0.2));
        assert_eq!(intervals.last(), Some(&LineInterval { start: 22, end: 30 }));
        assert_eq!(intervals.len(), 2);
    }

    #[test]
    fn band_touching_top_edge_starts_at_zero() {
        let binary = banded(50, 30, &[(0, 6, 50), (15, 20, 50)]);
        let intervals = detect_lines(&binary, &fraction_of_max(0.2));
        assert_eq!(intervals[0], LineInterval { start: 0, end: 6 });
    }

    #[test]
    fn blank_page_has_no_lines() {
        let binary = banded(40, 40, &[]);
        assert!(detect_lines(&binary, &DetectConfig::default()).is_empty());
    }

    #[test]
    fn page_with_only_ink_is_one_line() {
        let binary = banded(20, 10, &[(0, 10, 20)]);
        // Every row equals max, so nothing is strictly above 1.0 * max.
        assert!(detect_lines(&binary, &fraction_of_max(1.0)).is_empty());
        assert_eq!(
            detect_lines(&binary, &fraction_of_max(0.5)),
            vec![LineInterval { start: 0, end: 10 }]
        );
    }

    #[test]
    fn short_intervals_are_discarded() {
        let binary = banded(60, 40, &[(5, 7, 60), (20, 30, 60)]);
        let config = DetectConfig {
            min_line_height: 3,
            ..fraction_of_max(0.2)
        };
        assert_eq!(
            detect_lines(&binary, &config),
            vec![LineInterval { start: 20, end: 30 }]
        );
    }

    #[test]
    fn small_gaps_merge_when_enabled() {
        let binary = banded(60, 40, &[(5, 10, 60), (11, 16, 60), (30, 36, 60)]);
        let plain = detect_lines(&binary, &fraction_of_max(0.2));
        assert_eq!(plain.len(), 3);

        let merging = DetectConfig {
            merge_small_gaps: true,
            ..fraction_of_max(0.2)
        };
        assert_eq!(
            detect_lines(&binary, &merging),
            vec![
                LineInterval { start: 5, end: 16 },
                LineInterval { start: 30, end: 36 },
            ]
        );
    }

    #[test]
    fn dilation_widens_bands_and_bridges_one_row_gaps() {
        let binary = banded(60, 40, &[(10, 14, 60), (15, 19, 60)]);
        let dilated = DetectConfig {
            dilate: true,
            ..fraction_of_max(0.2)
        };
        assert_eq!(
            detect_lines(&binary, &dilated),
            vec![LineInterval { start: 9, end: 20 }]
        );
    }

    #[test]
    fn bands_are_all_found_and_overlapped() {
        let bands = [(3, 9, 80), (14, 22, 80), (28, 31, 80), (40, 52, 80), (60, 64, 80)];
        let binary = banded(80, 70, &bands);
        let intervals = detect_lines(&binary, &fraction_of_max(0.2));

        assert_eq!(intervals.len(), bands.len());
        assert_ordered_and_disjoint(&intervals);
        for (interval, &(start, end, _)) in intervals.iter().zip(bands.iter()) {
            assert!(interval.overlaps(&LineInterval { start, end }));
        }
    }

    #[test]
    fn raising_fraction_never_adds_lines() {
        // Bands of decreasing density: 100%, 60%, 30%, 10% of the width.
        let binary = banded(
            100,
            60,
            &[(2, 8, 100), (14, 20, 60), (26, 32, 30), (38, 44, 10)],
        );

        let mut previous = usize::MAX;
        for step in 1..=20 {
            let fraction = step as f64 * 0.05;
            let count = detect_lines(&binary, &fraction_of_max(fraction)).len();
            assert!(
                count <= previous,
                "fraction {fraction} found {count} lines, more than {previous}"
            );
            previous = count;
        }
        assert_eq!(previous, 0);
    }

    /// Deterministic pseudo-random band layouts; each band has uniform
    /// density, separated by gaps taller than the minimum line height.
    #[test]
    fn generated_layouts_keep_ordering_and_monotonicity() {
        let mut seed: u64 = 0x5eed;
        let mut next = |bound: u32| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) % bound as u64) as u32
        };

        for _ in 0..25 {
            let width = 40 + next(60);
            let mut bands = Vec::new();
            let mut y = next(6);
            loop {
                let height = 3 + next(8);
                if y + height > 120 {
                    break;
                }
                bands.push((y, y + height, 1 + next(width)));
                y += height + 4 + next(6);
            }
            let binary = banded(width, 120, &bands);

            let mut previous = usize::MAX;
            for step in 1..=10 {
                let intervals = detect_lines(&binary, &fraction_of_max(step as f64 * 0.1));
                assert_ordered_and_disjoint(&intervals);
                assert!(intervals.len() <= previous);
                previous = intervals.len();
            }
        }
    }

    #[test]
    fn profile_counts_dark_ink_too() {
        let img = GrayImage::from_fn(10, 4, |x, y| Luma([if y == 1 && x < 4 { 0 } else { 255 }]));
        let binary = BinaryImage::new(img, 0).expect("two-valued");
        let profile = horizontal_profile(&binary, false);
        assert_eq!(profile.values(), &[0, 4, 0, 0]);
    }
}
