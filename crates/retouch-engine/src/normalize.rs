use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use retouch_contracts::envelope::ResultEnvelope;

use crate::derive::DerivedAsset;
use crate::fetch::FetchedImage;
use crate::store::StoredAssets;

/// Terminal state of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    NoImageFound,
    /// The fetched image could not be decoded or re-encoded.
    InlineOriginal(FetchedImage),
    /// Derivation worked but persistence did not.
    InlineProcessed(DerivedAsset),
    Stored(StoredAssets),
}

impl EditOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoImageFound => "no_image_found",
            Self::InlineOriginal(_) => "inline_original",
            Self::InlineProcessed(_) => "inline_processed",
            Self::Stored(_) => "stored",
        }
    }
}

pub fn normalize(outcome: EditOutcome) -> Vec<ResultEnvelope> {
    match outcome {
        EditOutcome::NoImageFound => Vec::new(),
        EditOutcome::InlineOriginal(image) => vec![ResultEnvelope::Inline {
            image_data: data_url(&image.display_mime(), &image.bytes),
        }],
        EditOutcome::InlineProcessed(asset) => vec![ResultEnvelope::Inline {
            image_data: data_url(asset.mime_type, &asset.bytes),
        }],
        EditOutcome::Stored(stored) => vec![ResultEnvelope::Stored {
            storage_path: stored.storage_path,
            thumbnail_path: stored.thumbnail_path,
            public_url: stored.public_url,
            thumbnail_url: stored.thumbnail_url,
            mime_type: stored.mime_type,
        }],
    }
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}
