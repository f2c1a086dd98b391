use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::time::Duration;

/// A downloaded image: the original bytes plus the decoded pixels.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub format: Option<ImageFormat>,
    pub image: DynamicImage,
}

impl FetchedImage {
    /// Decode raw bytes; anything the `image` crate cannot read is a fetch failure.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, FetchError> {
        let format = image::guess_format(&bytes).ok();
        let image = image::load_from_memory(&bytes)?;
        Ok(Self {
            bytes,
            format,
            image,
        })
    }

    /// File extension for persisting the original bytes.
    pub fn extension(&self) -> &'static str {
        self.format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("jpg")
    }
}

/// Resolves a row's image reference into a decoded image.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, reference: &str, timeout: Duration) -> Result<FetchedImage, FetchError>;
}

/// Downloads images over HTTP(S).
pub struct HttpImageFetcher {
    http: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("face-screen/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, reference: &str, timeout: Duration) -> Result<FetchedImage, FetchError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(FetchError::EmptyReference);
        }

        let response = self.http.get(reference).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?.to_vec();

        tokio::task::spawn_blocking(move || FetchedImage::decode(bytes))
            .await
            .map_err(|e| FetchError::Interrupted(e.to_string()))?
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Image reference is empty")]
    EmptyReference,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Decode task interrupted: {0}")]
    Interrupted(String),
}
