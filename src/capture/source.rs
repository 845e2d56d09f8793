// src/capture/source.rs
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageOutputFormat};
use log::{info, warn};
use std::io::Cursor;
use std::path::Path;

use crate::predict::types::ImageUpload;

/// Name given to every photo taken with the camera.
pub const CAMERA_FILE_NAME: &str = "camera.jpg";
pub const CAMERA_MIME: &str = "image/jpeg";

/// Extensions offered by the file picker.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff"];

const JPEG_QUALITY: u8 = 92;

/// The image currently chosen for prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    UploadedFile {
        bytes: Vec<u8>,
        file_name: String,
        mime: String,
    },
    CapturedFrame {
        bytes: Vec<u8>,
    },
}

impl ImageSource {
    /// Load a user-chosen file. The content is not checked: whatever the
    /// user picked is what gets sent.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
        info!("Loaded {} ({} bytes)", file_name, bytes.len());
        Ok(Self::UploadedFile {
            bytes,
            mime: mime_for_path(path).to_string(),
            file_name,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::UploadedFile { bytes, .. } | Self::CapturedFrame { bytes } => bytes,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Self::UploadedFile { file_name, .. } => file_name,
            Self::CapturedFrame { .. } => CAMERA_FILE_NAME,
        }
    }

    pub fn to_upload(&self) -> ImageUpload {
        match self {
            Self::UploadedFile { bytes, file_name, mime } => {
                ImageUpload::new(file_name.clone(), mime.clone(), bytes.clone())
            }
            Self::CapturedFrame { bytes } => {
                ImageUpload::new(CAMERA_FILE_NAME, CAMERA_MIME, bytes.clone())
            }
        }
    }

    /// Decode the bytes for display; `None` when they are not an image we can read.
    pub fn decode_preview(&self) -> Option<DynamicImage> {
        match image::load_from_memory(self.bytes()) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!("Could not decode {} for preview: {}", self.file_name(), e);
                None
            }
        }
    }
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Encode a raster as JPEG, the format every camera capture is sent in.
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_to(&mut cursor, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    #[rstest]
    #[case("fruit.png", "image/png")]
    #[case("FRUIT.JPG", "image/jpeg")]
    #[case("a/b/c.webp", "image/webp")]
    #[case("notes.txt", "application/octet-stream")]
    #[case("noext", "application/octet-stream")]
    fn mime_from_extension(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(mime_for_path(&PathBuf::from(path)), expected);
    }

    #[test]
    fn captured_frame_uploads_as_camera_jpeg() {
        let upload = ImageSource::CapturedFrame { bytes: vec![1, 2, 3] }.to_upload();
        assert_eq!(upload.file_name, "camera.jpg");
        assert_eq!(upload.mime, "image/jpeg");
        assert_eq!(upload.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn encoded_jpeg_decodes_to_same_dimensions() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 6, image::Rgb([200, 30, 30])));
        let bytes = encode_jpeg(&img).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let source = ImageSource::CapturedFrame { bytes };
        let decoded = source.decode_preview().unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn undecodable_upload_has_no_preview_image() {
        let source = ImageSource::UploadedFile {
            bytes: b"not an image".to_vec(),
            file_name: "notes.txt".into(),
            mime: "text/plain".into(),
        };
        assert!(source.decode_preview().is_none());
    }

    #[test]
    fn from_path_reads_name_and_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apple.png");
        std::fs::write(&path, b"png-ish").unwrap();
        let source = ImageSource::from_path(&path).unwrap();
        match source {
            ImageSource::UploadedFile { bytes, file_name, mime } => {
                assert_eq!(bytes, b"png-ish");
                assert_eq!(file_name, "apple.png");
                assert_eq!(mime, "image/png");
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn from_path_missing_file_is_an_error() {
        assert!(ImageSource::from_path(Path::new("/definitely/not/here.png")).is_err());
    }
}
