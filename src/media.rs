//! Media hosting.
//!
//! Post creation never keeps raw bytes itself: it hands an upload to a
//! [`MediaHost`] and stores only the URL that comes back.

use std::convert::Infallible;

use mime_guess::from_path;
use multer::{Constraints, Multipart, SizeLimit};
use spin_sdk::http::Response;
use tracing::{debug, info};

use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{last_segment, new_id};
use crate::core::store::DocumentStore;

pub struct MediaUpload<'a> {
    pub file_name: &'a str,
    pub content_type: Option<&'a str>,
    pub bytes: &'a [u8],
}

impl MediaUpload<'_> {
    /// File extension for the upload, from the file name or else the
    /// declared content type.
    pub fn extension(&self) -> Option<String> {
        let from_name = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty());
        from_name.or_else(|| {
            let content_type = self.content_type?.split(';').next()?.trim();
            let ext = match content_type {
                "image/jpeg" | "image/jpg" => "jpg",
                "image/png" => "png",
                "image/gif" => "gif",
                "image/webp" => "webp",
                _ => return None,
            };
            Some(ext.to_string())
        })
    }

    pub fn validate(&self) -> Result<String, ApiError> {
        if self.bytes.is_empty() {
            return Err(ApiError::MissingMedia);
        }
        if self.bytes.len() > MAX_MEDIA_BYTES {
            return Err(ApiError::Validation(format!(
                "Media exceeds {} bytes",
                MAX_MEDIA_BYTES
            )));
        }
        match self.extension() {
            Some(ext) if ALLOWED_MEDIA_EXTENSIONS.contains(&ext.as_str()) => Ok(ext),
            _ => Err(ApiError::Validation(format!(
                "Unsupported media format, allowed: {}",
                ALLOWED_MEDIA_EXTENSIONS.join(", ")
            ))),
        }
    }
}

/// Parts of a `multipart/form-data` post creation body.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file_name: String,
    pub content_type: Option<String>,
    pub media: Vec<u8>,
    pub caption: String,
}

impl UploadForm {
    pub fn upload(&self) -> MediaUpload<'_> {
        MediaUpload {
            file_name: &self.file_name,
            content_type: self.content_type.as_deref(),
            bytes: &self.media,
        }
    }
}

fn malformed(err: multer::Error) -> ApiError {
    ApiError::Validation(format!("Malformed multipart body: {}", err))
}

/// Reads the `media` file field and the `caption` text field of a
/// multipart body. Other fields are skipped. A missing `media` field leaves
/// `media` empty.
pub fn read_upload_form(content_type: &str, body: &[u8]) -> Result<UploadForm, ApiError> {
    let boundary = multer::parse_boundary(content_type).map_err(malformed)?;
    let constraints = Constraints::new().size_limit(
        SizeLimit::new()
            .for_field("media", MAX_MEDIA_BYTES as u64)
            .for_field("caption", (MAX_CAPTION_LENGTH * 4) as u64),
    );

    let body = body.to_vec();
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = Multipart::with_constraints(stream, boundary, constraints);

    futures::executor::block_on(async {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "media" => {
                    form.file_name = field.file_name().unwrap_or("upload").to_string();
                    form.content_type = field.content_type().map(|mime| mime.to_string());
                    form.media = field.bytes().await.map_err(malformed)?.to_vec();
                }
                "caption" => form.caption = field.text().await.map_err(malformed)?,
                other => debug!(field = other, "skipping multipart field"),
            }
        }
        Ok::<_, ApiError>(form)
    })
}

pub trait MediaHost {
    /// Persists the upload and returns a durable URL for it.
    fn upload(&self, upload: &MediaUpload<'_>) -> Result<String, ApiError>;
}

/// Keeps media bytes in the document store under `media:{name}` and serves
/// them from `/media/{name}`.
pub struct KvMediaHost<'a> {
    store: &'a dyn DocumentStore,
    base_url: &'a str,
}

impl<'a> KvMediaHost<'a> {
    pub fn new(store: &'a dyn DocumentStore, base_url: &'a str) -> Self {
        Self { store, base_url }
    }
}

impl MediaHost for KvMediaHost<'_> {
    fn upload(&self, upload: &MediaUpload<'_>) -> Result<String, ApiError> {
        let ext = upload.validate()?;
        let name = format!("{}.{}", new_id(), ext);

        self.store
            .set(&media_key(&name), upload.bytes)
            .map_err(|e| ApiError::Upload(e.to_string()))?;

        info!(name = %name, bytes = upload.bytes.len(), "media stored");
        Ok(format!("{}/media/{}", self.base_url, name))
    }
}

pub fn serve_media(store: &dyn DocumentStore, path: &str) -> Result<Response, ApiError> {
    let name = last_segment(path);
    if name.is_empty() || name.contains("..") {
        return Err(ApiError::not_found("Media"));
    }

    let bytes = store
        .get(&media_key(name))?
        .ok_or_else(|| ApiError::not_found("Media"))?;
    let mime = from_path(name).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", mime.as_ref())
        .header("Cache-Control", "public, max-age=31536000, immutable")
        .body(bytes)
        .build())
}
