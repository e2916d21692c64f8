use std::path::Path;

use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};

/// Convert image to 8-bit RGB, dropping alpha and expanding grayscale
pub fn to_rgb(img: &DynamicImage) -> RgbImage {
    img.to_rgb8()
}

/// Resize to a `size`×`size` square with bicubic interpolation
pub fn resize_square(img: &RgbImage, size: u32) -> RgbImage {
    image::imageops::resize(img, size, size, FilterType::CatmullRom)
}

/// Scale pixels to [0, 1] and lay them out channel-major (CHW)
pub fn to_chw_unit(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut out = vec![0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for channel in 0..3 {
            out[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }
    out
}

/// Decode an image file and turn it into encoder input
pub fn load_image(path: &Path, size: u32) -> anyhow::Result<Vec<f32>> {
    let img = ImageReader::open(path)
        .with_context(|| format!("Failed to open image {:?}", path))?
        .with_guessed_format()
        .with_context(|| format!("Failed to read image header {:?}", path))?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image {:?}: {}", path, e))?;

    let rgb = to_rgb(&img);
    let resized = resize_square(&rgb, size);
    Ok(to_chw_unit(&resized))
}
