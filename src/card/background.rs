use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use super::CardError;

/// Decode `bytes` and cover-crop them to `width`×`height`, returning PNG.
pub fn prepare(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CardError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|err| CardError::ImageDecode(err.to_string()))?;
    let (w, h) = decoded.dimensions();
    if w == 0 || h == 0 {
        return Err(CardError::ImageDecode("image has no pixels".into()));
    }
    let resized = decoded.resize_to_fill(width, height, FilterType::Triangle);
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(resized.to_rgb8())
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|err| CardError::ImageDecode(err.to_string()))?;
    Ok(out)
}
