//! Encoded image payloads exchanged with the analysis service.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use base64::{engine::general_purpose, Engine as _};
use std::fmt;

/// Compression format of an encoded image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageEncoding {
    Jpeg,
    Png,
}

impl ImageEncoding {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Png => "image/png",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageEncoding::Jpeg),
            "image/png" => Some(ImageEncoding::Png),
            _ => None,
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime())
    }
}

/// An opaque compressed photo plus its pixel dimensions.
///
/// Instances are cheap to inspect and are cloned whenever a frame is handed
/// to the network layer, so the original capture is never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    encoding: ImageEncoding,
    width: u32,
    height: u32,
}

impl EncodedImage {
    pub fn new(bytes: Vec<u8>, encoding: ImageEncoding, width: u32, height: u32) -> Self {
        Self {
            bytes,
            encoding,
            width,
            height,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Length of the compressed payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Renders the payload as `data:<mime>;base64,<payload>`, the form the
    /// service expects in JSON bodies.
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.encoding.mime(),
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// Size of the data URI without building it.
    pub fn data_uri_len(&self) -> usize {
        "data:;base64,".len() + self.encoding.mime().len() + self.bytes.len().div_ceil(3) * 4
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("encoding", &self.encoding)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_has_mime_prefix_and_base64_body() {
        let image = EncodedImage::new(vec![0xff, 0xd8, 0xff], ImageEncoding::Jpeg, 1, 1);
        let uri = image.to_data_uri();
        assert_eq!(uri, "data:image/jpeg;base64,/9j/");
        assert_eq!(image.data_uri_len(), uri.len());
    }

    #[test]
    fn data_uri_len_accounts_for_padding() {
        let image = EncodedImage::new(vec![1, 2, 3, 4], ImageEncoding::Png, 2, 2);
        assert_eq!(image.data_uri_len(), image.to_data_uri().len());
    }

    #[test]
    fn mime_lookup_is_case_insensitive() {
        assert_eq!(ImageEncoding::from_mime("IMAGE/PNG"), Some(ImageEncoding::Png));
        assert_eq!(ImageEncoding::from_mime("image/jpg"), Some(ImageEncoding::Jpeg));
        assert_eq!(ImageEncoding::from_mime("image/gif"), None);
    }
}
