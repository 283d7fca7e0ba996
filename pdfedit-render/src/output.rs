use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use pdfedit_core::RenderImage;

pub fn to_rgba_image(image: &RenderImage) -> Result<RgbaImage> {
    RgbaImage::from_raw(image.width, image.height, image.pixels.clone()).ok_or_else(|| {
        anyhow!(
            "bitmap of {}x{} does not match {} bytes of pixel data",
            image.width,
            image.height,
            image.pixels.len()
        )
    })
}

/// Writes the bitmap as PNG (or any format `image` infers from the extension).
pub fn write_image(image: &RenderImage, path: &Path) -> Result<()> {
    to_rgba_image(image)?
        .save(path)
        .with_context(|| format!("failed to write {:?}", path))
}
