use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use std::io::Cursor;

use crate::config::IntakeConfig;
use crate::models::{FileHandle, Preview, UploadEntry};
use crate::services::registry::UploadRegistry;
use crate::utils::validation::{ValidationError, sanitize_filename, validate_upload};

/// Outcome of admitting a multi-file selection
#[derive(Debug, Default)]
pub struct IntakeReport {
    /// Ids of the created entries, in selection order
    pub accepted: Vec<String>,
    /// File name and reason for every rejected file
    pub rejected: Vec<(String, ValidationError)>,
}

/// Validates candidate files and turns them into `Pending` registry entries
#[derive(Debug, Clone)]
pub struct FileIntake {
    config: IntakeConfig,
}

impl FileIntake {
    pub fn new(config: IntakeConfig) -> Self {
        Self { config }
    }

    /// Validates one file and builds its entry. Nothing is registered.
    pub async fn accept(&self, file: FileHandle) -> Result<UploadEntry, ValidationError> {
        let mime = validate_upload(
            &file.mime_type,
            &file.bytes,
            self.config.max_file_size,
            &self.config.allowed_mime_types,
            self.config.verify_signature,
        )?;

        let file = FileHandle {
            name: sanitize_filename(&file.name),
            mime_type: mime,
            ..file
        };

        let max_dimension = self.config.preview_max_dimension;
        let source = file.clone();
        let preview = match tokio::task::spawn_blocking(move || build_preview(&source, max_dimension))
            .await
        {
            Ok(preview) => preview,
            Err(e) => {
                tracing::warn!("Preview task for {} failed: {}", file.name, e);
                raw_preview(&file)
            }
        };

        Ok(UploadEntry::new(file, preview))
    }

    /// Admits every valid file of a selection into the registry.
    ///
    /// Files are handled independently; a rejected file does not stop the
    /// ones after it.
    pub async fn accept_all(&self, files: Vec<FileHandle>, registry: &UploadRegistry) -> IntakeReport {
        let mut report = IntakeReport::default();

        for file in files {
            let name = file.name.clone();
            match self.accept(file).await {
                Ok(entry) => {
                    let id = entry.id.clone();
                    match registry.add(entry).await {
                        Ok(()) => {
                            tracing::info!("📥 Accepted {} as {}", name, id);
                            report.accepted.push(id);
                        }
                        // Fresh v4 ids; only reachable if the registry was pre-seeded with this id
                        Err(e) => tracing::error!("Could not register {}: {}", name, e),
                    }
                }
                Err(e) => {
                    tracing::warn!("❌ Rejected {}: {}", name, e);
                    report.rejected.push((name, e));
                }
            }
        }

        report
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// The original payload as a data URI, with dimensions when the header is readable
fn raw_preview(file: &FileHandle) -> Preview {
    let dimensions = image::io::Reader::new(Cursor::new(&file.bytes[..]))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok());

    Preview {
        data_uri: data_uri(&file.mime_type, &file.bytes),
        width: dimensions.map(|(w, _)| w),
        height: dimensions.map(|(_, h)| h),
    }
}

fn thumbnail_preview(file: &FileHandle, max_dimension: u32) -> Result<Preview> {
    let img = image::load_from_memory(&file.bytes)
        .map_err(|e| anyhow!("Failed to load image: {}", e))?;

    if img.width() <= max_dimension && img.height() <= max_dimension {
        return Ok(Preview {
            data_uri: data_uri(&file.mime_type, &file.bytes),
            width: Some(img.width()),
            height: Some(img.height()),
        });
    }

    // Resize to fit max_dimension while preserving aspect ratio
    let thumb = img.thumbnail(max_dimension, max_dimension);
    let mut out = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| anyhow!("Failed to encode preview: {}", e))?;

    Ok(Preview {
        data_uri: data_uri("image/png", &out),
        width: Some(thumb.width()),
        height: Some(thumb.height()),
    })
}

/// Builds the displayable preview. CPU-bound; run off the async workers.
pub fn build_preview(file: &FileHandle, max_dimension: Option<u32>) -> Preview {
    match max_dimension {
        Some(max) => thumbnail_preview(file, max).unwrap_or_else(|e| {
            tracing::warn!("Falling back to original payload for {} preview: {}", file.name, e);
            raw_preview(file)
        }),
        None => raw_preview(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 40, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_raw_preview_is_data_uri_with_dimensions() {
        let file = FileHandle::new("eye.png", "image/png", png_bytes(40, 30));
        let preview = build_preview(&file, None);
        assert!(preview.data_uri.starts_with("data:image/png;base64,"));
        assert_eq!((preview.width, preview.height), (Some(40), Some(30)));
    }

    #[test]
    fn test_thumbnail_preview_downscales() {
        let file = FileHandle::new("eye.png", "image/png", png_bytes(400, 200));
        let preview = build_preview(&file, Some(100));
        assert_eq!((preview.width, preview.height), (Some(100), Some(50)));
    }

    #[test]
    fn test_undecodable_payload_falls_back() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend_from_slice(&[0u8; 64]);
        let file = FileHandle::new("broken.jpg", "image/jpeg", bytes.clone());

        let preview = build_preview(&file, Some(128));
        assert_eq!(preview.data_uri, data_uri("image/jpeg", &bytes));
        assert_eq!(preview.width, None);
    }

    #[tokio::test]
    async fn test_accept_normalizes_name_and_type() {
        let intake = FileIntake::new(IntakeConfig::default());
        let file = FileHandle::new("scans/left eye.png", "IMAGE/PNG", png_bytes(8, 8));
        let entry = intake.accept(file).await.unwrap();
        assert_eq!(entry.file.name, "left eye.png");
        assert_eq!(entry.file.mime_type, "image/png");
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test]
    async fn test_accept_rejects_spoofed_type() {
        let intake = FileIntake::new(IntakeConfig::default());
        let file = FileHandle::new("eye.jpg", "image/jpeg", png_bytes(8, 8));
        let err = intake.accept(file).await.unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_MISMATCH");

        let relaxed = FileIntake::new(IntakeConfig::development());
        let file = FileHandle::new("eye.jpg", "image/jpeg", png_bytes(8, 8));
        assert!(relaxed.accept(file).await.is_ok());
    }

    #[tokio::test]
    async fn test_accept_all_empty_selection() {
        let intake = FileIntake::new(IntakeConfig::default());
        let registry = UploadRegistry::new();
        let report = intake.accept_all(Vec::new(), &registry).await;
        assert!(report.accepted.is_empty());
        assert!(report.rejected.is_empty());
        assert!(registry.is_empty().await);
    }
}
