//! Downscaling and re-encoding of photos into transmittable payloads.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::EncodeSettings;
use crate::error::SessionError;
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use friendfinder_client_lib::payload::{EncodedImage, ImageEncoding};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use log::debug;

/// Decodes `image`, shrinks it into the `max_width` x `max_height` box and
/// re-encodes it as JPEG at `quality` (1-100). Never upsamples.
pub fn normalize(
    image: &EncodedImage,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> Result<EncodedImage, SessionError> {
    let rgb = decode_rgb(image)?;
    normalize_rgb(&rgb, max_width, max_height, quality)
}

pub fn normalize_with(
    image: &EncodedImage,
    settings: &EncodeSettings,
) -> Result<EncodedImage, SessionError> {
    normalize(
        image,
        settings.max_width,
        settings.max_height,
        settings.jpeg_quality,
    )
}

/// Same as `normalize` for an already decoded frame.
pub fn normalize_rgb(
    rgb: &RgbImage,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> Result<EncodedImage, SessionError> {
    let (width, height) = rgb.dimensions();
    let (target_width, target_height) = fit_within(width, height, max_width, max_height);

    let resized = if (target_width, target_height) == (width, height) {
        None
    } else {
        Some(downscale_with_fast_image_resize(
            rgb,
            target_width,
            target_height,
        )?)
    };
    let frame = resized.as_ref().unwrap_or(rgb);

    let bytes = encode_jpeg(frame, quality)?;
    debug!(
        "Normalized {}x{} -> {}x{}, {} bytes",
        width,
        height,
        target_width,
        target_height,
        bytes.len()
    );

    Ok(EncodedImage::new(
        bytes,
        ImageEncoding::Jpeg,
        target_width,
        target_height,
    ))
}

/// Largest size with the same aspect ratio that fits the box; images that
/// already fit are left alone.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let fitted_width = ((width as f64 * ratio).floor() as u32).clamp(1, max_width.max(1));
    let fitted_height = ((height as f64 * ratio).floor() as u32).clamp(1, max_height.max(1));
    (fitted_width, fitted_height)
}

/// Wraps raw JPEG or PNG file contents, reading the dimensions from the data.
pub fn encoded_from_bytes(bytes: Vec<u8>) -> Result<EncodedImage, SessionError> {
    let format = image::guess_format(&bytes)
        .map_err(|_| SessionError::UnsupportedFormat("unrecognized image data".into()))?;
    let encoding = match format {
        ImageFormat::Jpeg => ImageEncoding::Jpeg,
        ImageFormat::Png => ImageEncoding::Png,
        other => return Err(SessionError::UnsupportedFormat(format!("{:?}", other))),
    };
    let decoded = image::load_from_memory_with_format(&bytes, format)?;
    let (width, height) = (decoded.width(), decoded.height());
    Ok(EncodedImage::new(bytes, encoding, width, height))
}

pub fn decode_rgb(image: &EncodedImage) -> Result<RgbImage, SessionError> {
    let format = match image.encoding() {
        ImageEncoding::Jpeg => ImageFormat::Jpeg,
        ImageEncoding::Png => ImageFormat::Png,
    };
    Ok(image::load_from_memory_with_format(image.bytes(), format)?.to_rgb8())
}

pub fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, SessionError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).encode_image(rgb)?;
    Ok(bytes)
}

fn downscale_with_fast_image_resize(
    src: &RgbImage,
    target_width: u32,
    target_height: u32,
) -> Result<RgbImage, SessionError> {
    let src_image = Image::from_vec_u8(src.width(), src.height(), src.to_vec(), PixelType::U8x3)
        .map_err(|e| SessionError::Resize(e.to_string()))?;

    let mut dst_image = Image::new(target_width, target_height, PixelType::U8x3);
    let mut resizer = Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )
        .map_err(|e| SessionError::Resize(e.to_string()))?;

    RgbImage::from_raw(target_width, target_height, dst_image.into_vec())
        .ok_or_else(|| SessionError::Resize("resized buffer has the wrong length".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_images::{solid_jpeg, textured_rgb};

    #[test]
    fn fit_preserves_aspect_and_never_upsamples() {
        assert_eq!(fit_within(1920, 1080, 320, 240), (320, 180));
        assert_eq!(fit_within(1080, 1920, 320, 240), (135, 240));
        assert_eq!(fit_within(200, 100, 320, 240), (200, 100));
        assert_eq!(fit_within(640, 480, 320, 240), (320, 240));
    }

    #[test]
    fn fit_never_collapses_to_zero() {
        assert_eq!(fit_within(10_000, 1, 320, 240), (320, 1));
    }

    #[test]
    fn normalized_output_stays_inside_the_box() {
        for (w, h) in [(1280, 720), (333, 999), (640, 640), (100, 50)] {
            let source = EncodedImage::new(
                encode_jpeg(&textured_rgb(w, h, 7), 95).unwrap(),
                ImageEncoding::Jpeg,
                w,
                h,
            );
            let out = normalize(&source, 320, 240, 20).unwrap();
            assert!(out.width() <= 320 && out.height() <= 240, "{w}x{h} -> {:?}", out.dimensions());
            assert_eq!(out.encoding(), ImageEncoding::Jpeg);

            let decoded = decode_rgb(&out).unwrap();
            assert_eq!(decoded.dimensions(), out.dimensions());
        }
    }

    #[test]
    fn low_quality_output_is_smaller_than_high_quality_input() {
        let rgb = textured_rgb(640, 480, 3);
        let source = EncodedImage::new(encode_jpeg(&rgb, 100).unwrap(), ImageEncoding::Jpeg, 640, 480);

        let out = normalize(&source, 320, 240, 20).unwrap();
        assert!(out.byte_len() < source.byte_len());
    }

    #[test]
    fn input_is_left_untouched() {
        let source = solid_jpeg(400, 300, [90, 90, 90]);
        let before = source.clone();
        let _ = normalize(&source, 100, 100, 50).unwrap();
        assert_eq!(source, before);
    }

    #[test]
    fn raw_bytes_are_wrapped_with_their_dimensions() {
        let bytes = encode_jpeg(&textured_rgb(120, 90, 4), 80).unwrap();
        let image = encoded_from_bytes(bytes).unwrap();
        assert_eq!(image.dimensions(), (120, 90));
        assert_eq!(image.encoding(), ImageEncoding::Jpeg);

        assert!(matches!(
            encoded_from_bytes(b"BM not a jpeg".to_vec()),
            Err(SessionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn corrupt_payload_is_an_image_error() {
        let garbage = EncodedImage::new(vec![1, 2, 3, 4], ImageEncoding::Jpeg, 10, 10);
        assert!(matches!(
            normalize(&garbage, 320, 240, 20),
            Err(SessionError::Image(_))
        ));
    }
}
