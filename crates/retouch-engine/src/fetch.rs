use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;

use crate::codec::sniff_mime;
use crate::truncate_text;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// Content type as reported by the origin, if any.
    pub mime_type: Option<String>,
}

impl FetchedImage {
    /// Best MIME type for handing the raw bytes back to a browser: the
    /// reported type when it names an image, otherwise whatever the bytes
    /// look like.
    pub fn display_mime(&self) -> String {
        self.mime_type
            .as_deref()
            .and_then(|raw| raw.split(';').next())
            .map(|raw| raw.trim().to_ascii_lowercase())
            .filter(|raw| raw.starts_with("image/"))
            .or_else(|| sniff_mime(&self.bytes).map(str::to_string))
            .unwrap_or_else(|| "image/png".to_string())
    }
}

pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<FetchedImage>;
}

pub struct HttpImageFetcher {
    timeout: Duration,
    http: HttpClient,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            http: HttpClient::new(),
        }
    }

    fn download(&self, url: &str) -> Result<FetchedImage> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("generated image download failed ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "generated image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("failed reading generated image bytes")?
            .to_vec();
        if bytes.is_empty() {
            bail!("generated image download returned an empty body ({url})");
        }
        Ok(FetchedImage { bytes, mime_type })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, locator: &str) -> Result<FetchedImage> {
        let trimmed = locator.trim();
        if trimmed.starts_with("data:") {
            return decode_data_url(trimmed);
        }
        let lowered = trimmed.to_ascii_lowercase();
        if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
            bail!(
                "unsupported generated image locator '{}'",
                truncate_text(trimmed, 80)
            );
        }
        self.download(trimmed)
    }
}

fn decode_data_url(value: &str) -> Result<FetchedImage> {
    let (meta, payload) = value
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("invalid data URL image payload"))?;
    let mime = meta
        .trim()
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string);
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("generated image data URL base64 decode failed")?;
    if bytes.is_empty() {
        bail!("generated image data URL is empty");
    }
    Ok(FetchedImage {
        bytes,
        mime_type: mime,
    })
}
