//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod normalize;
pub mod quality;
pub mod source;

#[cfg(test)]
pub(crate) mod test_images {
    use crate::frame::normalize::encode_jpeg;
    use friendfinder_client_lib::payload::{EncodedImage, ImageEncoding};
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const CELL: u32 = 16;

    /// Random-coloured 16px cells with a little noise on top, so the texture
    /// survives heavy JPEG compression.
    pub fn textured_rgb(width: u32, height: u32, seed: u64) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let cols = width.div_ceil(CELL) as usize;
        let rows = height.div_ceil(CELL) as usize;
        let cells: Vec<[u8; 3]> = (0..cols * rows).map(|_| rng.gen()).collect();

        RgbImage::from_fn(width, height, |x, y| {
            let [r, g, b] = cells[(y / CELL) as usize * cols + (x / CELL) as usize];
            let jitter: i16 = rng.gen_range(-8..=8);
            let shade = |c: u8| (c as i16 + jitter).clamp(0, 255) as u8;
            Rgb([shade(r), shade(g), shade(b)])
        })
    }

    pub fn textured_jpeg(width: u32, height: u32, seed: u64) -> EncodedImage {
        let bytes = encode_jpeg(&textured_rgb(width, height, seed), 90).unwrap();
        EncodedImage::new(bytes, ImageEncoding::Jpeg, width, height)
    }

    pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> EncodedImage {
        let rgb = RgbImage::from_pixel(width, height, Rgb(color));
        let bytes = encode_jpeg(&rgb, 90).unwrap();
        EncodedImage::new(bytes, ImageEncoding::Jpeg, width, height)
    }
}
