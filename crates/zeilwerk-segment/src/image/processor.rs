// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — loading, grayscale conversion, row cropping, and
// encoding. Operates on in-memory images using the `image` crate.

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageFormat, ImageReader};
use tracing::{info, instrument};
use zeilwerk_core::config::LineFormat;
use zeilwerk_core::error::ZeilwerkError;

/// Image processing steps operating on a single in-memory image.
///
/// Transformations return a new `ImageProcessor` wrapping the transformed
/// image, enabling method chaining.
///
/// ```ignore
/// let line = ImageProcessor::open("page.png")?
///     .crop_rows(120, 148)
///     .into_luma8();
/// ```
pub struct ImageProcessor {
    /// The current working image.
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    ///
    /// A path that does not resolve to a file is [`ZeilwerkError::InputNotFound`];
    /// a file that cannot be decoded is [`ZeilwerkError::UnsupportedFormat`].
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ZeilwerkError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ZeilwerkError::InputNotFound(format!(
                "image {}",
                path.display()
            )));
        }

        let reader = ImageReader::open(path)
            .map_err(|err| {
                ZeilwerkError::InputNotFound(format!("image {}: {}", path.display(), err))
            })?
            .with_guessed_format()
            .map_err(|err| {
                ZeilwerkError::UnsupportedFormat(format!("{}: {}", path.display(), err))
            })?;

        let img = reader.decode().map_err(|err| {
            ZeilwerkError::UnsupportedFormat(format!("{}: {}", path.display(), err))
        })?;
        info!(
            width = img.width(),
            height = img.height(),
            "Image loaded"
        );
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    /// Consume the processor and return the underlying `DynamicImage`.
    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    /// Consume the processor and return a single-channel 8-bit image.
    ///
    /// Images that are already `Luma8` are moved out without copying.
    pub fn into_luma8(self) -> GrayImage {
        match self.image {
            DynamicImage::ImageLuma8(gray) => gray,
            other => other.to_luma8(),
        }
    }

    // -- Transformations ------------------------------------------------------

    /// Crop the full image width across the half-open row range `[start, end)`.
    ///
    /// The range is clamped to the image height. Borrows, so one page can be
    /// cut into many lines.
    pub fn crop_rows(&self, start: u32, end: u32) -> Self {
        let img_w = self.image.width();
        let img_h = self.image.height();

        let safe_start = start.min(img_h);
        let safe_end = end.clamp(safe_start, img_h);

        let cropped = self
            .image
            .crop_imm(0, safe_start, img_w, safe_end - safe_start);
        Self { image: cropped }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image in a line-image format.
    pub fn to_bytes(&self, format: LineFormat) -> Result<Vec<u8>, ZeilwerkError> {
        encode_to_format(&self.image, image_format(format))
    }

    /// Write the image to a file. The format is inferred from the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ZeilwerkError> {
        self.image.save(path.as_ref()).map_err(|err| {
            ZeilwerkError::ImageEncode(format!(
                "failed to save image to {}: {}",
                path.as_ref().display(),
                err
            ))
        })
    }
}

/// Map a configured line format onto the `image` crate's format enum.
fn image_format(format: LineFormat) -> ImageFormat {
    match format {
        LineFormat::Png => ImageFormat::Png,
        LineFormat::Tiff => ImageFormat::Tiff,
        LineFormat::Bmp => ImageFormat::Bmp,
    }
}

/// Encode a `DynamicImage` into the specified format, returning the raw bytes.
fn encode_to_format(
    image: &DynamicImage,
    format: ImageFormat,
) -> Result<Vec<u8>, ZeilwerkError> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image.write_to(&mut cursor, format).map_err(|err| {
        ZeilwerkError::ImageEncode(format!("image encoding failed: {}", err))
    })?;
    Ok(buffer)
}
