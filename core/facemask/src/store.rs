use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec;
use crate::error::{AnonymizeError, StoreError};
use crate::options::AnonymizeOptions;
use crate::{Anonymizer, Mode, OutputFormat};

/// Opaque byte source and sink for stored images.
pub trait ByteStore: Send + Sync {
    /// Read the object at `path`.
    fn fetch(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Write `data` to `path` and return its public URL.
    fn store(&self, path: &str, data: &[u8], content_type: &str) -> Result<String, StoreError>;
}

/// [`ByteStore`] over a local directory, served under a public base URL.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    public_base_url: String,
}

impl DirectoryStore {
    /// Store objects below `root`; URLs are `<public_base_url>/<path>`.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(root: P, public_base_url: S) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path onto the root, refusing anything that could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if path.is_empty() || !is_plain {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ByteStore for DirectoryStore {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let full = self.resolve(path)?;
        match std::fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn store(&self, path: &str, data: &[u8], content_type: &str) -> Result<String, StoreError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, data)?;
        debug!(path, content_type, bytes = data.len(), "stored object");
        Ok(format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            path
        ))
    }
}

/// A request to anonymize an image that already lives in a [`ByteStore`].
///
/// Options are flattened into the request, so a router payload such as
/// `{"imagePath": "u1/raw.jpg", "userId": "u1", "mode": "blur"}` deserializes
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredImageRequest {
    /// Object path of the source image.
    pub image_path: String,
    /// Owner of the result; becomes the first path segment of the stored object.
    pub user_id: String,
    /// Processing options for this request.
    #[serde(flatten)]
    pub options: AnonymizeOptions,
}

/// Outcome of [`anonymize_stored`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredImageResult {
    /// Public URL of the anonymized image.
    #[serde(rename = "processedImageUrl")]
    pub url: String,
    /// Number of faces detected.
    #[serde(rename = "facesDetected")]
    pub face_count: usize,
    /// Mode that was applied.
    pub mode: Mode,
}

/// Fetch an image, anonymize it and store the result at
/// `<user_id>/<unix_millis>-processed.<ext>`.
///
/// The extension and content type follow the bytes actually produced: images
/// passed through without faces keep their original format.
pub fn anonymize_stored(
    anonymizer: &Anonymizer,
    store: &dyn ByteStore,
    request: &StoredImageRequest,
) -> Result<StoredImageResult, AnonymizeError> {
    if request.user_id.is_empty() || request.user_id.contains(['/', '\\']) {
        return Err(StoreError::InvalidPath(request.user_id.clone()).into());
    }

    let input = store.fetch(&request.image_path)?;
    let result = anonymizer.process_with(&input, &request.options)?;

    let (extension, content_type) = output_kind(&result.data);
    let destination = format!(
        "{}/{}-processed.{}",
        request.user_id,
        unix_millis(),
        extension
    );
    let url = store.store(&destination, &result.data, content_type)?;

    info!(
        source = %request.image_path,
        destination = %destination,
        face_count = result.face_count,
        "stored anonymized image"
    );
    Ok(StoredImageResult {
        url,
        face_count: result.face_count,
        mode: request.options.mode,
    })
}

fn output_kind(data: &[u8]) -> (&'static str, &'static str) {
    let jpeg = OutputFormat::Jpeg;
    match codec::detect_format(data) {
        Ok(format) if format != image::ImageFormat::Jpeg => (
            format.extensions_str().first().copied().unwrap_or("bin"),
            format.to_mime_type(),
        ),
        _ => (jpeg.extension(), jpeg.content_type()),
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face_detector::Detector;
    use std::sync::Arc;

    fn make_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([10, 20, 30]));
        codec::encode(&img, &OutputFormat::Png, 95).unwrap()
    }

    #[test]
    fn directory_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path(), "https://cdn.example.com/images/");

        let url = store.store("u1/a.jpg", b"bytes", "image/jpeg").unwrap();
        assert_eq!(url, "https://cdn.example.com/images/u1/a.jpg");
        assert!(store.root().join("u1").join("a.jpg").is_file());
        assert_eq!(store.fetch("u1/a.jpg").unwrap(), b"bytes");
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path(), "http://localhost");
        assert!(matches!(
            store.fetch("nope.jpg"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path(), "http://localhost");
        for path in ["", "../etc/passwd", "/etc/passwd", "a/../../b", "./a"] {
            assert!(
                matches!(store.fetch(path), Err(StoreError::InvalidPath(_))),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    fn stored_job_keeps_format_of_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path(), "http://localhost");
        let input = make_png();
        store.store("raw/in.png", &input, "image/png").unwrap();

        let anonymizer = Anonymizer::new(Arc::new(Detector::disabled()));
        let request = StoredImageRequest {
            image_path: "raw/in.png".into(),
            user_id: "u1".into(),
            options: AnonymizeOptions::default(),
        };
        let result = anonymize_stored(&anonymizer, &store, &request).unwrap();

        assert_eq!(result.face_count, 0);
        assert_eq!(result.mode, Mode::Pixelate);
        assert!(result.url.starts_with("http://localhost/u1/"));
        assert!(result.url.ends_with("-processed.png"));

        let stored_path = result.url.trim_start_matches("http://localhost/");
        assert_eq!(store.fetch(stored_path).unwrap(), input);
    }

    #[test]
    fn invalid_user_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path(), "http://localhost");
        let anonymizer = Anonymizer::new(Arc::new(Detector::disabled()));
        let request = StoredImageRequest {
            image_path: "raw/in.png".into(),
            user_id: "../u1".into(),
            options: AnonymizeOptions::default(),
        };
        let err = anonymize_stored(&anonymizer, &store, &request).unwrap_err();
        assert!(matches!(err, AnonymizeError::Store(StoreError::InvalidPath(_))));
        assert!(err.is_client_error());
    }

    #[test]
    fn request_deserializes_with_flattened_options() {
        let request: StoredImageRequest = serde_json::from_str(
            r#"{ "imagePath": "u1/raw.jpg", "userId": "u1", "mode": "blur", "pixelateSize": 20 }"#,
        )
        .unwrap();
        assert_eq!(request.image_path, "u1/raw.jpg");
        assert_eq!(request.options.mode, Mode::Blur);
        assert_eq!(request.options.pixelate_size, 20);
        assert_eq!(request.options.blur_strength, 31);
    }

    #[test]
    fn result_serializes_with_service_field_names() {
        let result = StoredImageResult {
            url: "http://localhost/u1/1-processed.jpg".into(),
            face_count: 2,
            mode: Mode::Pixelate,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["processedImageUrl"], "http://localhost/u1/1-processed.jpg");
        assert_eq!(json["facesDetected"], 2);
        assert_eq!(json["mode"], "pixelate");
    }
}
