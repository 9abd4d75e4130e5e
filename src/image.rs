//! Image uploads handed to the classifier gateway.
//!
//! The gateway accepts PNG and JPEG only. Kind detection prefers magic
//! bytes and falls back to a MIME type or file extension hint.

use std::path::Path;

use eyre::{Result, WrapErr};
use sha2::{Digest, Sha256};

/// Maximum accepted upload size (50 MB).
pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PNG_MAGIC) {
            Some(Self::Png)
        } else if bytes.starts_with(JPEG_MAGIC) {
            Some(Self::Jpeg)
        } else {
            None
        }
    }

    /// Parse a MIME type, ignoring parameters (`image/png; q=1`).
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

/// Raw image bytes plus their kind.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub kind: ImageKind,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, kind: ImageKind) -> Self {
        Self { bytes, kind }
    }

    /// Detect the kind from content, then `hint` (MIME type or extension).
    /// Returns an error for empty, oversize or unsupported images.
    pub fn detect(bytes: Vec<u8>, hint: Option<&str>) -> Result<Self> {
        if bytes.is_empty() {
            eyre::bail!("Image is empty");
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            eyre::bail!(
                "Image is {} bytes; maximum is {} bytes",
                bytes.len(),
                MAX_IMAGE_BYTES
            );
        }
        let kind = ImageKind::sniff(&bytes)
            .or_else(|| hint.and_then(ImageKind::from_mime))
            .or_else(|| hint.and_then(ImageKind::from_extension))
            .ok_or_else(|| {
                eyre::eyre!(
                    "Unsupported image format{}; expected PNG or JPEG",
                    hint.map(|h| format!(" ({h})")).unwrap_or_default()
                )
            })?;
        Ok(Self { bytes, kind })
    }

    /// Load from disk, using the file extension as the hint.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .wrap_err_with(|| format!("Failed to read image {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str());
        Self::detect(bytes, ext)
    }

    /// File name sent with multipart uploads.
    pub fn file_name(&self) -> String {
        format!("scan.{}", self.kind.extension())
    }

    /// `sha256:<hex>` digest, recorded in the access log.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(&self.bytes);
        format!("sha256:{}", hex::encode(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let mut b = PNG_MAGIC.to_vec();
        b.extend_from_slice(&[0, 0, 0, 13]);
        b
    }

    #[test]
    fn test_sniff_magic_bytes() {
        assert_eq!(ImageKind::sniff(&png_bytes()), Some(ImageKind::Png));
        assert_eq!(ImageKind::sniff(&[0xff, 0xd8, 0xff, 0xe0]), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::sniff(b"DICM"), None);
    }

    #[test]
    fn test_detect_uses_hint_when_magic_unknown() {
        let img = ImageUpload::detect(vec![1, 2, 3], Some("image/jpeg; charset=binary")).unwrap();
        assert_eq!(img.kind, ImageKind::Jpeg);
        let img = ImageUpload::detect(vec![1, 2, 3], Some("PNG")).unwrap();
        assert_eq!(img.kind, ImageKind::Png);
    }

    #[test]
    fn test_detect_magic_overrides_hint() {
        let img = ImageUpload::detect(png_bytes(), Some("image/jpeg")).unwrap();
        assert_eq!(img.kind, ImageKind::Png);
    }

    #[test]
    fn test_detect_rejects_unsupported() {
        let err = ImageUpload::detect(vec![1, 2, 3], Some("application/dicom")).unwrap_err();
        assert!(err.to_string().contains("Unsupported image format"));
        assert!(ImageUpload::detect(Vec::new(), None).is_err());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let img = ImageUpload::from_path(&path).unwrap();
        assert_eq!(img.kind, ImageKind::Png);
        assert_eq!(img.file_name(), "scan.png");
        assert!(img.digest().starts_with("sha256:"));
        assert_eq!(img.digest().len(), "sha256:".len() + 64);
    }
}
