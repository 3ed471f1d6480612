//! Image-asset API client (SWIMG).
//!
//! Images live at `{base}{identifier}.jpg`. Outcomes:
//!
//! | Response | Result |
//! |----------|--------|
//! | 2xx, recognisable image bytes | [`ImageFetch::Found`] |
//! | 2xx, anything else | [`ImageFetch::Degraded`] |
//! | 404 | [`ImageFetch::Absent`] |
//! | timeout | [`ImageFetch::Degraded`] (not retried) |
//! | network error, 429, 5xx | retried, then [`SyncError::FetchFailed`] |
//! | other 4xx | [`SyncError::FetchFailed`] |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::SwimgConfig;
use crate::error::{Result, SyncError};
use crate::http::{backoff_delay, is_retryable, with_trailing_slash};
use crate::models::{ImageAsset, ImageFetch};

/// A source of per-item images.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch_image(&self, identifier: &str) -> Result<ImageFetch>;
}

/// HTTP client for the image-asset API.
pub struct SwimgClient {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_base_ms: u64,
}

impl SwimgClient {
    pub fn new(config: &SwimgConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: with_trailing_slash(&config.url),
            client,
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        })
    }

    pub fn image_url(&self, identifier: &str) -> String {
        format!("{}{}.jpg", self.base_url, identifier)
    }
}

#[async_trait]
impl AssetSource for SwimgClient {
    async fn fetch_image(&self, identifier: &str) -> Result<ImageFetch> {
        let url = self.image_url(identifier);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt, self.retry_base_ms)).await;
            }

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    warn!(%url, "image fetch timed out");
                    return Ok(ImageFetch::Degraded("image fetch timed out".to_string()));
                }
                Err(e) => {
                    last_err = Some(SyncError::fetch(&url, e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                debug!(%url, "no image");
                return Ok(ImageFetch::Absent);
            }
            if !status.is_success() {
                let err = SyncError::fetch(&url, format!("HTTP {}", status));
                if is_retryable(status) {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }

            let header_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) if e.is_timeout() => {
                    warn!(%url, "image download timed out");
                    return Ok(ImageFetch::Degraded("image fetch timed out".to_string()));
                }
                Err(e) => {
                    last_err = Some(SyncError::fetch(&url, e.to_string()));
                    continue;
                }
            };

            return Ok(classify_image(bytes, header_type.as_deref()));
        }

        Err(last_err.unwrap_or_else(|| SyncError::fetch(&url, "request failed after retries")))
    }
}

/// Turn downloaded bytes into an [`ImageFetch`], checking they are an image.
pub fn classify_image(bytes: Vec<u8>, header_type: Option<&str>) -> ImageFetch {
    let Some(sniffed) = sniff_image_type(&bytes) else {
        return ImageFetch::Degraded("not a valid image".to_string());
    };
    let content_type = header_type
        .filter(|t| t.starts_with("image/"))
        .unwrap_or(sniffed)
        .to_string();
    ImageFetch::Found(ImageAsset {
        bytes,
        content_type,
    })
}

/// Detect an image format from its magic bytes.
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_image_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image_type(b"\x89PNG\r\n\x1a\n...."), Some("image/png"));
        assert_eq!(sniff_image_type(b"GIF89a..."), Some("image/gif"));
        assert_eq!(sniff_image_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_type(b"<html>"), None);
        assert_eq!(sniff_image_type(b""), None);
    }

    #[test]
    fn html_error_page_is_degraded() {
        let fetch = classify_image(b"<html>oops</html>".to_vec(), Some("text/html"));
        assert_eq!(fetch, ImageFetch::Degraded("not a valid image".to_string()));
    }

    #[test]
    fn header_type_wins_when_it_is_an_image() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xDB];
        match classify_image(jpeg.clone(), Some("image/pjpeg")) {
            ImageFetch::Found(asset) => assert_eq!(asset.content_type, "image/pjpeg"),
            other => panic!("unexpected {:?}", other),
        }
        match classify_image(jpeg, Some("application/octet-stream")) {
            ImageFetch::Found(asset) => assert_eq!(asset.content_type, "image/jpeg"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn image_url_appends_jpg() {
        let client = SwimgClient::new(&SwimgConfig {
            url: "https://img.example/characters".into(),
            timeout_secs: 1,
            max_retries: 0,
            retry_base_ms: 1,
            strict: false,
        })
        .unwrap();
        assert_eq!(client.image_url("4"), "https://img.example/characters/4.jpg");
    }
}
