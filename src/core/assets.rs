use crate::core::error::{Result, StoryError};
use std::path::{Path, PathBuf};

/// One uploaded character image, encoded once per session and reused across
/// every remote call. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct CharacterAsset {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// An image resource as the host hands it over: a path on disk, or raw bytes
/// with their declared content type (e.g. from a browser file picker).
#[derive(Debug, Clone)]
pub enum ImageSource {
    File(PathBuf),
    Bytes { data: Vec<u8>, mime_type: String },
}

// Formats the Gemini API accepts as reference images.
const SUPPORTED_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
];

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// Reads the resource fully into memory and records its content type.
pub async fn encode(source: &ImageSource) -> Result<CharacterAsset> {
    match source {
        ImageSource::File(path) => {
            let mime_type = mime_for_path(path)
                .ok_or_else(|| StoryError::UnsupportedImage(path.display().to_string()))?;
            let data = tokio::fs::read(path)
                .await
                .map_err(|source| StoryError::ImageRead {
                    path: path.display().to_string(),
                    source,
                })?;
            if data.is_empty() {
                return Err(StoryError::EmptyImage);
            }
            Ok(CharacterAsset {
                data,
                mime_type: mime_type.to_string(),
            })
        }
        ImageSource::Bytes { data, mime_type } => {
            if data.is_empty() {
                return Err(StoryError::EmptyImage);
            }
            Ok(CharacterAsset {
                data: data.clone(),
                mime_type: mime_type.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_encode_file_records_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hero.png");
        fs::write(&path, b"not-really-a-png").unwrap();

        let asset = encode(&ImageSource::File(path)).await.unwrap();
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(asset.data, b"not-really-a-png");
    }

    #[tokio::test]
    async fn test_encode_uppercase_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hero.JPG");
        fs::write(&path, b"jpeg bytes").unwrap();

        let asset = encode(&ImageSource::File(path)).await.unwrap();
        assert_eq!(asset.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_encode_unsupported_extension() {
        let source = ImageSource::File(PathBuf::from("hero.bmp"));
        let err = encode(&source).await.unwrap_err();
        assert!(matches!(err, StoryError::UnsupportedImage(_)));
    }

    #[tokio::test]
    async fn test_encode_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = ImageSource::File(dir.path().join("nope.png"));
        let err = encode(&source).await.unwrap_err();
        assert!(matches!(err, StoryError::ImageRead { .. }));
    }

    #[tokio::test]
    async fn test_encode_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        fs::write(&path, b"").unwrap();
        let err = encode(&ImageSource::File(path)).await.unwrap_err();
        assert!(matches!(err, StoryError::EmptyImage));
    }

    #[tokio::test]
    async fn test_encode_bytes_passthrough() {
        let source = ImageSource::Bytes {
            data: vec![1, 2, 3],
            mime_type: "image/webp".to_string(),
        };
        let asset = encode(&source).await.unwrap();
        assert_eq!(asset.data, vec![1, 2, 3]);
        assert_eq!(asset.mime_type, "image/webp");
    }
}
