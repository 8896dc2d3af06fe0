// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the zeilwerk-segment crate: normalization and
// line detection on a synthetic page.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use zeilwerk_core::config::{DetectConfig, NormalizeConfig};
use zeilwerk_segment::{detect_lines, normalize};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A 1240x1754 page (A4 at 150 DPI) with 40 text-like lines: dark glyph runs
/// on slightly noisy paper.
fn synthetic_page() -> DynamicImage {
    let (width, height) = (1240u32, 1754u32);
    let img = GrayImage::from_fn(width, height, |x, y| {
        let in_line = y > 80 && (y - 80) % 40 < 18 && y < 80 + 40 * 40;
        let in_glyph = (x / 9) % 5 != 0 && x > 100 && x < width - 100;
        if in_line && in_glyph && (x + y) % 4 != 0 {
            Luma([25 + ((x * 7 + y) % 20) as u8])
        } else {
            Luma([225 + ((x + y * 3) % 25) as u8])
        }
    });
    DynamicImage::ImageLuma8(img)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_normalize(c: &mut Criterion) {
    let page = synthetic_page();
    let config = NormalizeConfig::default();

    c.bench_function("normalize otsu (1240x1754)", |b| {
        b.iter(|| {
            let binary = normalize(black_box(&page), &config).expect("normalize");
            black_box(binary);
        });
    });
}

/// Line detection with and without the dilation pre-pass.
fn bench_detect_lines(c: &mut Criterion) {
    let binary = normalize(&synthetic_page(), &NormalizeConfig::default()).expect("normalize");

    c.bench_function("detect_lines (1240x1754)", |b| {
        let config = DetectConfig::default();
        b.iter(|| black_box(detect_lines(black_box(&binary), &config)));
    });

    c.bench_function("detect_lines dilated (1240x1754)", |b| {
        let config = DetectConfig {
            dilate: true,
            ..DetectConfig::default()
        };
        b.iter(|| black_box(detect_lines(black_box(&binary), &config)));
    });
}

criterion_group!(benches, bench_normalize, bench_detect_lines);
criterion_main!(benches);
