//! HTTP image fetching.
//!
//! Images are served over plain HTTP at `/api/image/<key>`, independent
//! of the MOO channel.

use crate::error::ImageError;
use bytes::Bytes;

type Result<T> = std::result::Result<T, ImageError>;

/// How the Core should fit the image into the requested dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageScale {
    Fit,
    Fill,
    Stretch,
}

impl ImageScale {
    fn as_str(&self) -> &'static str {
        match self {
            ImageScale::Fit => "fit",
            ImageScale::Fill => "fill",
            ImageScale::Stretch => "stretch",
        }
    }
}

/// Output format to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// Optional transform parameters. A scale mode requires both width and
/// height.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageOptions {
    pub scale: Option<ImageScale>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
}

/// Fetched image bytes and their content type.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub bytes: Bytes,
    pub content_type: String,
}

/// HTTP client for a Core's image endpoint.
#[derive(Debug, Clone)]
pub struct ImageClient {
    base_url: String,
    http: reqwest::Client,
}

impl ImageClient {
    /// Client for the Core at `host:port` (the same port as the MOO
    /// WebSocket, default 9100).
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{host}:{port}"),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch an image by the key carried in zone/queue/browse models.
    pub async fn fetch(&self, image_key: &str, options: ImageOptions) -> Result<ImageData> {
        let url = self.build_url(image_key, &options)?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ImageError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Http {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ImageError::InvalidResponse("missing content type".into()))?;
        if !content_type.starts_with("image/") {
            return Err(ImageError::InvalidResponse(format!(
                "unexpected content type: {content_type}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageError::Network(e.to_string()))?;

        Ok(ImageData {
            bytes,
            content_type,
        })
    }

    fn build_url(&self, image_key: &str, options: &ImageOptions) -> Result<String> {
        if image_key.is_empty() || image_key.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(ImageError::InvalidImageKey);
        }
        if options.scale.is_some() && (options.width.is_none() || options.height.is_none()) {
            return Err(ImageError::MissingScaleDimensions);
        }

        let mut query = Vec::new();
        if let Some(scale) = options.scale {
            query.push(format!("scale={}", scale.as_str()));
        }
        if let Some(width) = options.width {
            query.push(format!("width={width}"));
        }
        if let Some(height) = options.height {
            query.push(format!("height={height}"));
        }
        if let Some(format) = options.format {
            query.push(format!("format={}", format.as_str()));
        }

        let mut url = format!("{}/api/image/{image_key}", self.base_url);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        Ok(url)
    }
}
