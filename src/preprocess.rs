//! Deterministic image preprocessing applied before embedding.
//!
//! Every step is a pure function of the previous one so re-indexing the same
//! file always produces the same pixels.

use std::path::Path;

use image::{ imageops::{ self, FilterType }, DynamicImage, Rgb, RgbImage };

use crate::error::Result;

pub const BRIGHTNESS_FACTOR: f32 = 1.1;
pub const CONTRAST_FACTOR: f32 = 1.1;
pub const TARGET_SIZE: u32 = 224;
pub const CHANNEL_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Decodes an image file, guessing the format from its content.
pub fn load(path: &Path) -> Result<DynamicImage> {
    let image = image::ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image)
}

/// Full pipeline: RGB, brightness, contrast, resize, channel normalization.
pub fn preprocess(image: &DynamicImage) -> RgbImage {
    let rgb = image.to_rgb8();
    let brightened = enhance_brightness(&rgb, BRIGHTNESS_FACTOR);
    let contrasted = enhance_contrast(&brightened, CONTRAST_FACTOR);
    let resized = imageops::resize(&contrasted, TARGET_SIZE, TARGET_SIZE, FilterType::Lanczos3);
    normalize(&resized)
}

/// Interpolates every channel between `degenerate` and the pixel value.
/// A factor of 1.0 returns the input unchanged.
fn blend(degenerate: f32, value: u8, factor: f32) -> u8 {
    let out = degenerate + factor * ((value as f32) - degenerate);
    if out <= 0.0 {
        0
    } else if out >= 255.0 {
        255
    } else {
        out as u8
    }
}

pub fn enhance_brightness(image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = blend(0.0, *channel, factor);
        }
    }
    out
}

pub fn enhance_contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let gray = mean_luma(image) as f32;
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = blend(gray, *channel, factor);
        }
    }
    out
}

/// Mean ITU-R 601 luma, rounded to the nearest integer.
pub fn mean_luma(image: &RgbImage) -> u8 {
    let count = (image.width() as u64) * (image.height() as u64);
    if count == 0 {
        return 0;
    }
    let sum: u64 = image
        .pixels()
        .map(|p| luma(p) as u64)
        .sum();
    ((sum as f64) / (count as f64) + 0.5) as u8
}

fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    (((r as u32) * 19595 + (g as u32) * 38470 + (b as u32) * 7471 + 0x8000) >> 16) as u8
}

pub fn normalize(image: &RgbImage) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel.0 = normalize_pixel(pixel.0);
    }
    out
}

/// Standardizes each channel and maps it back to a byte.
///
/// Standardized values fall outside `[0, 1]`, so scaling by 255 and truncating
/// wraps modulo 256. Previously indexed embeddings were computed this way.
pub fn normalize_pixel(pixel: [u8; 3]) -> [u8; 3] {
    let mut out = [0u8; 3];
    for c in 0..3 {
        let standardized = ((pixel[c] as f64) / 255.0 - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        out[c] = quantize(standardized * 255.0);
    }
    out
}

fn quantize(value: f64) -> u8 {
    (value.trunc() as i64) as u8
}
