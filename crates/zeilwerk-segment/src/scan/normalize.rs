// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image normalizer — grayscale conversion, binarization (global Otsu or
// adaptive local mean), and speck cleanup for scanned page images.

use std::path::Path;

use image::{DynamicImage, GrayImage, Luma, imageops};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::integral_image::{integral_image, sum_image_pixels};
use imageproc::morphology::open;
use imageproc::stats::histogram;
use tracing::{debug, info, instrument};
use zeilwerk_core::config::{BinarizeMethod, InkPolarity, NormalizeConfig};
use zeilwerk_core::error::ZeilwerkError;

use crate::image::processor::ImageProcessor;

/// Ink value of a canonical mask, as returned by [`BinaryImage::ink_mask`].
pub const INK: u8 = 255;
/// Background value of a canonical mask.
pub const BACKGROUND: u8 = 0;

/// A grayscale image with at most two distinct pixel values, one of which is
/// designated as ink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    pixels: GrayImage,
    ink: u8,
}

impl BinaryImage {
    /// Wrap a two-valued grayscale image, naming the ink value explicitly.
    ///
    /// Fails with [`ZeilwerkError::UnsupportedFormat`] if the image has more
    /// than two distinct values.
    pub fn new(pixels: GrayImage, ink: u8) -> Result<Self, ZeilwerkError> {
        let levels = gray_levels(&pixels).iter().filter(|&&count| count > 0).count();
        if levels > 2 {
            return Err(ZeilwerkError::UnsupportedFormat(format!(
                "binary image has {levels} distinct values"
            )));
        }
        Ok(Self { pixels, ink })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// The pixel value that counts as ink.
    pub fn ink(&self) -> u8 {
        self.ink
    }

    /// Borrow the underlying grayscale pixels.
    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageLuma8(self.pixels.clone())
    }

    /// A copy in canonical form: ink is [`INK`], everything else [`BACKGROUND`].
    pub fn ink_mask(&self) -> GrayImage {
        let ink = self.ink;
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            if self.pixels.get_pixel(x, y).0[0] == ink {
                Luma([INK])
            } else {
                Luma([BACKGROUND])
            }
        })
    }

    /// Write the binary image to disk. The format follows the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ZeilwerkError> {
        ImageProcessor::from_dynamic(self.to_dynamic()).save(path)
    }
}

/// Load an image from disk and normalize it.
#[instrument(skip(config), fields(path = %path.as_ref().display()))]
pub fn normalize_path(
    path: impl AsRef<Path>,
    config: &NormalizeConfig,
) -> Result<BinaryImage, ZeilwerkError> {
    let image = ImageProcessor::open(path)?.into_dynamic();
    normalize(&image, config)
}

/// Convert any raster image into a [`BinaryImage`].
///
/// Images with at most two distinct gray values are returned as-is after
/// grayscale conversion. Everything else is thresholded and drawn in the
/// ink's own tone: dark ink as 0 on 255, bright ink as 255 on 0. The ink
/// value of the result is then picked by the same rule as for an
/// already-binary input, so normalizing the output again changes nothing.
#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn normalize(
    image: &DynamicImage,
    config: &NormalizeConfig,
) -> Result<BinaryImage, ZeilwerkError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ZeilwerkError::UnsupportedFormat(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }

    let gray = ImageProcessor::from_dynamic(image.clone()).into_luma8();
    let levels = gray_levels(&gray);

    if is_binarized_levels(&levels) {
        let ink = resolve_ink(&levels, config.polarity);
        info!(ink, "Image already binarized; skipping threshold");
        return Ok(BinaryImage { pixels: gray, ink });
    }

    let (mut mask, dark_ink) = match config.method {
        BinarizeMethod::Otsu => binarize_otsu(&gray, &levels, config.polarity),
        BinarizeMethod::Adaptive { block_radius, c } => (
            binarize_adaptive(&gray, block_radius, c, config.polarity),
            config.polarity != InkPolarity::Bright,
        ),
    };

    if config.despeckle {
        mask = despeckle(&mask);
        debug!("Despeckle pass applied");
    }

    Ok(render(mask, dark_ink, config.polarity))
}

/// Whether a grayscale image has at most two distinct pixel values.
pub fn is_binarized(gray: &GrayImage) -> bool {
    is_binarized_levels(&gray_levels(gray))
}

fn is_binarized_levels(levels: &[u32; 256]) -> bool {
    levels.iter().filter(|&&count| count > 0).count() <= 2
}

/// Pixel count per gray level.
fn gray_levels(gray: &GrayImage) -> [u32; 256] {
    histogram(gray).channels[0]
}

/// Pick the ink value of an image with at most two gray levels.
///
/// A single-valued image has no ink; the returned value is one that does not
/// occur in it.
fn resolve_ink(levels: &[u32; 256], polarity: InkPolarity) -> u8 {
    let present: Vec<(u8, u32)> = levels
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(value, count)| (value as u8, *count))
        .collect();

    match present.as_slice() {
        [(dark, dark_count), (bright, bright_count)] => match polarity {
            InkPolarity::Bright => *bright,
            InkPolarity::Dark => *dark,
            InkPolarity::Auto if dark_count < bright_count => *dark,
            InkPolarity::Auto => *bright,
        },
        [(only, _)] => !*only,
        _ => INK,
    }
}

/// Draw a canonical mask in the ink's tone and resolve its ink value.
///
/// Under `Auto` the less frequent class is ink and an even split is drawn as
/// bright ink, matching [`resolve_ink`] on the result.
fn render(mut mask: GrayImage, dark_ink: bool, polarity: InkPolarity) -> BinaryImage {
    let mut dark_ink = dark_ink;
    if polarity == InkPolarity::Auto {
        let total = u64::from(mask.width()) * u64::from(mask.height());
        let mut ink_count = mask.pixels().filter(|p| p.0[0] == INK).count() as u64;
        if ink_count * 2 > total {
            imageops::invert(&mut mask);
            ink_count = total - ink_count;
        }
        if ink_count * 2 == total {
            dark_ink = false;
        }
    }

    let (ink_tone, paper_tone) = if dark_ink { (0, 255) } else { (255, 0) };
    let pixels = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get_pixel(x, y).0[0] == INK { ink_tone } else { paper_tone }])
    });
    let ink = resolve_ink(&gray_levels(&pixels), polarity);
    BinaryImage { pixels, ink }
}

// -- Global threshold ---------------------------------------------------------

/// Threshold with Otsu's method into a canonical mask.
///
/// Pixels at or below the level form the dark class. Which class is ink
/// follows `polarity`; under `Auto` the smaller class wins, ties going to the
/// bright class. Returns the mask and whether the ink is the dark class.
fn binarize_otsu(
    gray: &GrayImage,
    levels: &[u32; 256],
    polarity: InkPolarity,
) -> (GrayImage, bool) {
    let level = otsu_level(gray);
    let dark_count: u64 = levels[..=level as usize].iter().map(|&c| u64::from(c)).sum();
    let total = u64::from(gray.width()) * u64::from(gray.height());
    let bright_count = total - dark_count;

    let dark_is_ink = match polarity {
        InkPolarity::Dark => true,
        InkPolarity::Bright => false,
        InkPolarity::Auto => dark_count < bright_count,
    };
    info!(level, dark_is_ink, "Applying Otsu binarization");

    let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let is_dark = gray.get_pixel(x, y).0[0] <= level;
        Luma([if is_dark == dark_is_ink { INK } else { BACKGROUND }])
    });
    (mask, dark_is_ink)
}

// -- Adaptive threshold -------------------------------------------------------

/// Local mean thresholding into a canonical mask: a pixel is ink when it is
/// darker than the mean of its `block_radius` neighbourhood minus `c`
/// (brighter than mean plus `c` for bright ink).
fn binarize_adaptive(
    gray: &GrayImage,
    block_radius: u32,
    c: i32,
    polarity: InkPolarity,
) -> GrayImage {
    info!(block_radius, c, ?polarity, "Applying adaptive binarization");

    let (width, height) = gray.dimensions();
    let sums = integral_image::<_, u64>(gray);
    let bright_ink = polarity == InkPolarity::Bright;

    GrayImage::from_fn(width, height, |x, y| {
        let (left, top) = (x.saturating_sub(block_radius), y.saturating_sub(block_radius));
        let right = x.saturating_add(block_radius).min(width - 1);
        let bottom = y.saturating_add(block_radius).min(height - 1);
        let area = u64::from(right - left + 1) * u64::from(bottom - top + 1);
        let mean = (sum_image_pixels(&sums, left, top, right, bottom)[0] / area) as i32;

        let value = i32::from(gray.get_pixel(x, y).0[0]);
        let is_ink = if bright_ink {
            value > (mean + c).clamp(0, 255)
        } else {
            value < (mean - c).clamp(0, 255)
        };
        Luma([if is_ink { INK } else { BACKGROUND }])
    })
}

// -- Cleanup ------------------------------------------------------------------

/// Morphological opening with a 3x3 square: ink specks smaller than the
/// square disappear, larger strokes keep their shape.
fn despeckle(mask: &GrayImage) -> GrayImage {
    open(mask, Norm::LInf, 1)
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Light paper with darker "text" rows plus some noise in between, so the
    /// histogram has many levels.
    fn scanned_page() -> DynamicImage {
        let img = GrayImage::from_fn(60, 40, |x, y| {
            let text_row = (8..14).contains(&y) || (24..30).contains(&y);
            if text_row && x % 3 != 0 {
                Luma([20 + (x % 7) as u8])
            } else {
                Luma([215 + ((x + y) % 11) as u8])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    fn inked(binary: &BinaryImage, x: u32, y: u32) -> bool {
        binary.as_gray().get_pixel(x, y).0[0] == binary.ink()
    }

    fn adaptive() -> BinarizeMethod {
        BinarizeMethod::Adaptive {
            block_radius: 7,
            c: 10,
        }
    }

    #[test]
    fn already_binary_image_is_returned_unchanged() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 3 { 0 } else { 255 }]));
        let binary = normalize(&DynamicImage::ImageLuma8(img.clone()), &NormalizeConfig::default())
            .expect("normalize");
        assert_eq!(binary.as_gray(), &img);
        // 30 black pixels vs 70 white: the minority (black) is ink.
        assert_eq!(binary.ink(), 0);
    }

    #[test]
    fn two_valued_non_extreme_image_is_kept() {
        let img = GrayImage::from_fn(4, 4, |x, _| Luma([if x == 0 { 100 } else { 200 }]));
        assert!(is_binarized(&img));
        let binary = normalize(&DynamicImage::ImageLuma8(img.clone()), &NormalizeConfig::default())
            .expect("normalize");
        assert_eq!(binary.as_gray(), &img);
        assert_eq!(binary.ink(), 100);
    }

    #[test]
    fn three_values_are_not_binary() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([x as u8 * 100]));
        assert!(!is_binarized(&img));
    }

    #[test]
    fn tie_goes_to_bright_ink() {
        let img = GrayImage::from_fn(10, 10, |_, y| Luma([if y < 5 { 0 } else { 255 }]));
        let binary = normalize(&DynamicImage::ImageLuma8(img), &NormalizeConfig::default())
            .expect("normalize");
        assert_eq!(binary.ink(), 255);
    }

    #[test]
    fn explicit_polarity_overrides_auto() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 3 { 0 } else { 255 }]));
        let config = NormalizeConfig {
            polarity: InkPolarity::Bright,
            ..NormalizeConfig::default()
        };
        let binary = normalize(&DynamicImage::ImageLuma8(img), &config).expect("normalize");
        assert_eq!(binary.ink(), 255);
    }

    #[test]
    fn uniform_image_has_no_ink() {
        let img = GrayImage::from_pixel(5, 5, Luma([255u8]));
        let binary = normalize(&DynamicImage::ImageLuma8(img), &NormalizeConfig::default())
            .expect("normalize");
        assert!(binary.ink_mask().pixels().all(|p| p.0[0] == BACKGROUND));
    }

    #[test]
    fn otsu_draws_dark_text_as_black_ink() {
        let binary = normalize(&scanned_page(), &NormalizeConfig::default()).expect("normalize");
        assert_eq!(binary.ink(), 0);
        assert!(inked(&binary, 1, 10));
        assert!(!inked(&binary, 1, 2));
        assert!(!inked(&binary, 0, 10), "column 0 of text rows is paper");
        assert!(is_binarized(binary.as_gray()));
    }

    #[test]
    fn bright_polarity_draws_white_ink_on_black() {
        let config = NormalizeConfig {
            polarity: InkPolarity::Bright,
            ..NormalizeConfig::default()
        };
        let binary = normalize(&scanned_page(), &config).expect("normalize");
        assert_eq!(binary.ink(), 255);
        assert_eq!(binary.as_gray().get_pixel(1, 2).0[0], 255);
        assert!(inked(&binary, 1, 2));
        assert!(!inked(&binary, 1, 10));
    }

    #[test]
    fn normalize_is_idempotent_for_every_polarity_and_method() {
        for method in [BinarizeMethod::Otsu, adaptive()] {
            for polarity in [InkPolarity::Auto, InkPolarity::Dark, InkPolarity::Bright] {
                for despeckle in [false, true] {
                    let config = NormalizeConfig {
                        method,
                        polarity,
                        despeckle,
                    };
                    let once = normalize(&scanned_page(), &config).expect("first pass");
                    let twice = normalize(&once.to_dynamic(), &config).expect("second pass");
                    assert_eq!(once, twice, "{method:?} {polarity:?} despeckle={despeckle}");
                }
            }
        }
    }

    #[test]
    fn dark_polarity_keeps_lines_after_second_pass() {
        let config = NormalizeConfig {
            polarity: InkPolarity::Dark,
            ..NormalizeConfig::default()
        };
        let once = normalize(&scanned_page(), &config).expect("first pass");
        let twice = normalize(&once.to_dynamic(), &config).expect("second pass");
        assert_eq!(once.ink_mask(), twice.ink_mask());
        assert!(inked(&twice, 1, 10));
        assert!(!inked(&twice, 1, 2));
    }

    #[test]
    fn adaptive_marks_dark_text_as_ink() {
        let config = NormalizeConfig {
            method: adaptive(),
            ..NormalizeConfig::default()
        };
        let binary = normalize(&scanned_page(), &config).expect("normalize");
        assert!(inked(&binary, 1, 10));
        assert!(!inked(&binary, 1, 2));
    }

    #[test]
    fn auto_keeps_ink_the_minority() {
        // Sparse bright dots on a dark page: the local test marks the dark
        // majority, so the dots become ink.
        let img = GrayImage::from_fn(20, 20, |x, y| {
            Luma([if (x + y) % 5 == 0 { 250 } else { 10 + (x % 4) as u8 }])
        });
        let config = NormalizeConfig {
            method: BinarizeMethod::Adaptive {
                block_radius: 2,
                c: -100,
            },
            ..NormalizeConfig::default()
        };
        let binary = normalize(&DynamicImage::ImageLuma8(img), &config).expect("normalize");
        let ink = binary.ink_mask().pixels().filter(|p| p.0[0] == INK).count();
        assert_eq!(ink, 80);
        assert!(inked(&binary, 0, 0));
        let twice = normalize(&binary.to_dynamic(), &config).expect("second pass");
        assert_eq!(binary, twice);
    }

    #[test]
    fn colour_input_is_converted() {
        let rgb = RgbImage::from_fn(20, 20, |x, y| {
            if (5..10).contains(&y) && x > 2 {
                Rgb([10, 10, 40])
            } else {
                Rgb([240, 235, 220 + (x % 5) as u8])
            }
        });
        let binary = normalize(&DynamicImage::ImageRgb8(rgb), &NormalizeConfig::default())
            .expect("normalize");
        assert!(inked(&binary, 5, 6));
        assert!(!inked(&binary, 5, 15));
    }

    #[test]
    fn despeckle_removes_isolated_pixels() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([INK]));
        for y in 0..3 {
            for x in 0..9 {
                mask.put_pixel(x, y, Luma([INK]));
            }
        }
        let cleaned = despeckle(&mask);
        assert_eq!(cleaned.get_pixel(4, 4).0[0], BACKGROUND);
        assert_eq!(cleaned.get_pixel(4, 1).0[0], INK);
    }

    #[test]
    fn empty_image_is_unsupported() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        let result = normalize(&img, &NormalizeConfig::default());
        assert!(matches!(result, Err(ZeilwerkError::UnsupportedFormat(_))));
    }

    #[test]
    fn binary_image_rejects_three_values() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([x as u8]));
        assert!(BinaryImage::new(img, 0).is_err());
    }
}
