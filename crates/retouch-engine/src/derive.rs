use anyhow::Result;
use image::DynamicImage;

use crate::codec::{self, WEB_MIME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeriveSettings {
    pub full_quality: u8,
    pub thumbnail_quality: u8,
    pub thumbnail_max_side: u32,
}

impl Default for DeriveSettings {
    fn default() -> Self {
        Self {
            full_quality: 90,
            thumbnail_quality: 70,
            thumbnail_max_side: 512,
        }
    }
}

impl DeriveSettings {
    /// The thumbnail is meant to be the cheaper encode of the two.
    pub fn thumbnail_quality_not_below_full(&self) -> bool {
        self.thumbnail_quality >= self.full_quality
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedAsset {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedAssets {
    pub full: DerivedAsset,
    pub thumbnail: DerivedAsset,
}

pub fn derive_assets(bytes: &[u8], settings: &DeriveSettings) -> Result<DerivedAssets> {
    let decoded = codec::decode(bytes)?;
    Ok(DerivedAssets {
        full: encode_full(&decoded, settings.full_quality)?,
        thumbnail: encode_thumbnail(&decoded, settings)?,
    })
}

fn encode_full(image: &DynamicImage, quality: u8) -> Result<DerivedAsset> {
    Ok(DerivedAsset {
        bytes: codec::encode_lossy(image, quality)?,
        mime_type: WEB_MIME,
        width: image.width(),
        height: image.height(),
    })
}

fn encode_thumbnail(image: &DynamicImage, settings: &DeriveSettings) -> Result<DerivedAsset> {
    let resized = codec::resize_to_fit(image, settings.thumbnail_max_side);
    Ok(DerivedAsset {
        bytes: codec::encode_lossy(&resized, settings.thumbnail_quality)?,
        mime_type: WEB_MIME,
        width: resized.width(),
        height: resized.height(),
    })
}
