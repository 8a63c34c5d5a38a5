//! Image preparation for the 96-dot print head.
//!
//! Scales arbitrary images to head width and reduces them to pure black and
//! white, either by Floyd-Steinberg dithering or by thresholding, so that the
//! raster encoder's exact-black test applies.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use tracing::{debug, warn};

use crate::PRINTHEAD_PX;

/// Binarization threshold.
const THRESHOLD: u8 = 128;

/// Dots per millimetre at 203 DPI.
pub const DOTS_PER_MM: u32 = 8;

/// Default label height in dots (30 mm).
pub const DEFAULT_MAX_ROWS: u32 = 240;

/// Convert any image to a 96 px wide black-on-white bitmap.
///
/// Height follows the aspect ratio and is cropped to `max_rows`.
pub fn prepare_image(img: &DynamicImage, max_rows: u32, dither: bool) -> DynamicImage {
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    let new_h = ((u64::from(h) * u64::from(PRINTHEAD_PX)) / u64::from(w.max(1))).max(1) as u32;

    let mut resized = image::imageops::resize(&gray, PRINTHEAD_PX, new_h, FilterType::Lanczos3);
    if new_h > max_rows {
        warn!(height = new_h, max_rows, "Image taller than label, cropping bottom");
        resized = image::imageops::crop_imm(&resized, 0, 0, PRINTHEAD_PX, max_rows).to_image();
    }

    let mono = if dither {
        floyd_steinberg_dither(&resized)
    } else {
        threshold_convert(&resized, THRESHOLD)
    };
    DynamicImage::ImageLuma8(mono)
}

/// Apply Floyd-Steinberg dithering to a grayscale image.
///
/// Error distribution pattern:
/// - Right:        7/16
/// - Bottom-left:  3/16
/// - Bottom:       5/16
/// - Bottom-right: 1/16
pub fn floyd_steinberg_dither(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    debug!(width, height, "Applying Floyd-Steinberg dithering");

    let (w, h) = (width as usize, height as usize);
    let mut buffer: Vec<i16> = img.pixels().map(|p| i16::from(p.0[0])).collect();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let old_pixel = buffer[idx];
            let new_pixel: i16 = if old_pixel >= i16::from(THRESHOLD) { 255 } else { 0 };
            let error = old_pixel - new_pixel;
            buffer[idx] = new_pixel;

            if x + 1 < w {
                buffer[idx + 1] += error * 7 / 16;
            }
            if y + 1 < h {
                if x > 0 {
                    buffer[idx + w - 1] += error * 3 / 16;
                }
                buffer[idx + w] += error * 5 / 16;
                if x + 1 < w {
                    buffer[idx + w + 1] += error / 16;
                }
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        Luma([buffer[y as usize * w + x as usize].clamp(0, 255) as u8])
    })
}

/// Pixels at or above `threshold` become white, the rest black.
pub fn threshold_convert(img: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    debug!(width, height, threshold, "Applying threshold conversion");

    GrayImage::from_fn(width, height, |x, y| {
        let val = img.get_pixel(x, y).0[0];
        Luma([if val >= threshold { 255 } else { 0 }])
    })
}

/// Label height in dots for a length in millimetres.
pub fn label_rows_for_mm(length_mm: u32) -> u32 {
    length_mm * DOTS_PER_MM
}
