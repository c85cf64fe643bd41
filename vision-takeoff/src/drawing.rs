use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::{GenericImageView, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::info;

/// Longest side sent to the model; larger drawings are scaled down first
pub const MAX_SIDE: u32 = 3072;

/// An uploaded drawing, validated and ready to be sent inline
#[derive(Debug, Clone)]
pub struct DrawingImage {
    bytes: Vec<u8>,
    mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl DrawingImage {
    /// Accept JPEG or PNG bytes. Anything else is rejected.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes).context("Unrecognised image data")?;
        let mime_type = match format {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            other => anyhow::bail!("Unsupported drawing format {:?} (JPG or PNG only)", other),
        };

        let img = image::load_from_memory_with_format(&bytes, format)
            .context("Failed to decode drawing")?;
        let (width, height) = img.dimensions();

        if width.max(height) <= MAX_SIDE {
            return Ok(Self {
                bytes,
                mime_type,
                width,
                height,
            });
        }

        let resized = img.resize(MAX_SIDE, MAX_SIDE, image::imageops::FilterType::Lanczos3);
        let mut buffer = Cursor::new(Vec::new());
        resized
            .write_to(&mut buffer, ImageFormat::Png)
            .context("Failed to re-encode resized drawing")?;

        info!(
            "Drawing downscaled from {}x{} to {}x{}",
            width,
            height,
            resized.width(),
            resized.height()
        );

        Ok(Self {
            bytes: buffer.into_inner(),
            mime_type: "image/png",
            width: resized.width(),
            height: resized.height(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read drawing {}", path.display()))?;
        Self::from_bytes(bytes)
    }

    /// Decode a base64 upload, with or without a `data:` URI prefix
    pub fn from_base64(data: &str) -> Result<Self> {
        let payload = match data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => data,
        };
        let bytes = general_purpose::STANDARD
            .decode(payload.trim())
            .context("Failed to decode base64 image")?;
        Self::from_bytes(bytes)
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([255u8, 255, 255]));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, format)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_png_accepted() {
        let drawing = DrawingImage::from_bytes(encoded(40, 20, ImageFormat::Png)).unwrap();
        assert_eq!(drawing.mime_type(), "image/png");
        assert_eq!((drawing.width, drawing.height), (40, 20));
    }

    #[test]
    fn test_jpeg_accepted() {
        let drawing = DrawingImage::from_bytes(encoded(16, 16, ImageFormat::Jpeg)).unwrap();
        assert_eq!(drawing.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(DrawingImage::from_bytes(b"%PDF-1.7 not an image".to_vec()).is_err());
    }

    #[test]
    fn test_large_drawing_downscaled() {
        let drawing = DrawingImage::from_bytes(encoded(MAX_SIDE * 2, 100, ImageFormat::Png)).unwrap();
        assert_eq!(drawing.width, MAX_SIDE);
        assert!(drawing.height <= 100);
        assert_eq!(drawing.mime_type(), "image/png");
    }

    #[test]
    fn test_base64_with_data_uri() {
        let b64 = general_purpose::STANDARD.encode(encoded(8, 8, ImageFormat::Png));
        let uri = format!("data:image/png;base64,{}", b64);

        let plain = DrawingImage::from_base64(&b64).unwrap();
        let prefixed = DrawingImage::from_base64(&uri).unwrap();
        assert_eq!(plain.to_base64(), prefixed.to_base64());
    }
}
