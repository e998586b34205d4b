use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outward reference to one edited image: either persisted objects with
/// public URLs, or the image itself as a data URL when persistence was
/// bypassed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEnvelope {
    #[serde(rename_all = "camelCase")]
    Stored {
        storage_path: String,
        thumbnail_path: String,
        public_url: String,
        thumbnail_url: String,
        mime_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Inline { image_data: String },
}

impl ResultEnvelope {
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditOutput {
    pub results: Vec<ResultEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditResponse {
    pub output: EditOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub details: String,
}
