//! Moving pixels between runtime images and files.
//!
//! Decoding and encoding go through the `image` crate. `U8` maps to 8-bit luma, `RGB` to
//! RGB8 and `RGBX` to RGBA8; other decoded layouts are converted to RGB8 first. `U1`
//! images export as luma with set bits at 255.

use crate::core::context::Context;
use crate::core::error::VxError;
use crate::core::reference::Image;
use crate::core::types::DfImage;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::path::Path;
use thiserror::Error;

/// Errors while importing or exporting images.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("runtime error: {0}")]
    Runtime(#[from] VxError),

    #[error("format {0:?} has no file representation")]
    UnsupportedFormat(DfImage),
}

/// Copy a decoded image into a new runtime image.
pub fn import_image(ctx: &Context, decoded: &DynamicImage) -> Result<Image, IoError> {
    let (format, bytes) = match decoded {
        DynamicImage::ImageLuma8(gray) => (DfImage::U8, gray.as_raw().clone()),
        DynamicImage::ImageRgba8(rgba) => (DfImage::Rgbx, rgba.as_raw().clone()),
        other => (DfImage::Rgb, other.to_rgb8().into_raw()),
    };
    let image = ctx.create_image(decoded.width(), decoded.height(), format)?;
    ctx.write_image_plane(image, 0, &bytes)?;
    Ok(image)
}

/// Copy a runtime image out as a [`DynamicImage`].
pub fn export_image(ctx: &Context, image: Image) -> Result<DynamicImage, IoError> {
    let info = ctx.query_image(image)?;
    let (w, h) = (info.width, info.height);
    let plane = match info.format {
        DfImage::U1 | DfImage::U8 | DfImage::Rgb | DfImage::Rgbx => ctx.read_image_plane(image, 0)?,
        other => return Err(IoError::UnsupportedFormat(other)),
    };
    let decoded = match info.format {
        DfImage::U1 => {
            let row_bytes = (w as usize).div_ceil(8);
            let luma = (0..h as usize)
                .flat_map(|y| (0..w as usize).map(move |x| (y, x)))
                .map(|(y, x)| if plane[y * row_bytes + x / 8] & (1 << (x % 8)) != 0 { 255 } else { 0 })
                .collect();
            GrayImage::from_raw(w, h, luma).map(DynamicImage::ImageLuma8)
        }
        DfImage::U8 => GrayImage::from_raw(w, h, plane).map(DynamicImage::ImageLuma8),
        DfImage::Rgb => RgbImage::from_raw(w, h, plane).map(DynamicImage::ImageRgb8),
        _ => RgbaImage::from_raw(w, h, plane).map(DynamicImage::ImageRgba8),
    };
    decoded.ok_or(IoError::Runtime(VxError::InvalidDimension))
}

/// Decode a file into a new runtime image.
pub fn load_image(ctx: &Context, path: impl AsRef<Path>) -> Result<Image, IoError> {
    let decoded = image::open(path.as_ref())?;
    log::debug!("loaded {} ({}x{})", path.as_ref().display(), decoded.width(), decoded.height());
    import_image(ctx, &decoded)
}

/// Encode a runtime image to `path`. The extension picks the codec.
pub fn save_image(ctx: &Context, image: Image, path: impl AsRef<Path>) -> Result<(), IoError> {
    export_image(ctx, image)?.save(path.as_ref())?;
    log::debug!("saved {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_png_round_trip_keeps_rgb() {
        let ctx = Context::create().unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramp.png");
        let ramp = RgbImage::from_fn(5, 3, |x, y| image::Rgb([x as u8 * 40, y as u8 * 60, 7]));
        DynamicImage::ImageRgb8(ramp.clone()).save(&path).unwrap();

        let image = load_image(&ctx, &path).unwrap();
        let info = ctx.query_image(image).unwrap();
        assert_eq!((info.width, info.height, info.format), (5, 3, DfImage::Rgb));
        assert_eq!(ctx.read_image_plane(image, 0).unwrap(), ramp.into_raw());
    }

    #[test]
    fn test_bits_export_as_luma() {
        let ctx = Context::create().unwrap();
        let bits = ctx.create_image(10, 1, DfImage::U1).unwrap();
        ctx.write_image_plane(bits, 0, &[0b0000_0101, 0b0000_0010]).unwrap();
        let exported = export_image(&ctx, bits).unwrap().to_luma8().into_raw();
        assert_eq!(exported, vec![255, 0, 255, 0, 0, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn test_signed_formats_have_no_file_form() {
        let ctx = Context::create().unwrap();
        let wide = ctx.create_image(4, 4, DfImage::S16).unwrap();
        assert!(matches!(export_image(&ctx, wide), Err(IoError::UnsupportedFormat(DfImage::S16))));
    }
}
