use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

const FALLBACK_INSTRUCTION: &str = "Enhance this image appropriately.";
/// Largest seed the generation API accepts.
pub const MAX_SEED: u32 = 2_147_483_647;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditType {
    RemoveBackground,
    ReplaceBackgroundAuto,
    ReplaceBackgroundCustom,
    Enhance,
    Colorize,
    Other(String),
}

impl EditType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "remove_bg" => Self::RemoveBackground,
            "replace_bg_auto" => Self::ReplaceBackgroundAuto,
            "replace_bg_custom" => Self::ReplaceBackgroundCustom,
            "enhance" => Self::Enhance,
            "colorize" => Self::Colorize,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RemoveBackground => "remove_bg",
            Self::ReplaceBackgroundAuto => "replace_bg_auto",
            Self::ReplaceBackgroundCustom => "replace_bg_custom",
            Self::Enhance => "enhance",
            Self::Colorize => "colorize",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// Instruction sent upstream when the caller leaves the prompt blank.
    pub fn default_instruction(&self) -> &'static str {
        match self {
            Self::RemoveBackground => {
                "Remove the background from this image, keeping only the main subject with a transparent background."
            }
            Self::ReplaceBackgroundAuto => {
                "Replace the background with an aesthetically pleasing, contextually appropriate background."
            }
            Self::ReplaceBackgroundCustom => {
                "Replace the background with the reference image, ensuring seamless integration."
            }
            Self::Enhance => {
                "Enhance the image quality, improve sharpness, color balance, and overall visual appeal."
            }
            Self::Colorize => {
                "Adjust colors, improve contrast, and enhance visual quality while maintaining original style."
            }
            Self::Other(_) => FALLBACK_INSTRUCTION,
        }
    }
}

/// One image edit invocation. Built once from the inbound payload and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub source_image: Vec<u8>,
    pub instruction: String,
    pub reference_image: Option<Vec<u8>>,
    pub edit_type: EditType,
    pub negative_prompt: Option<String>,
    pub seed: Option<u32>,
}

impl EditRequest {
    pub fn new(
        source_image: Vec<u8>,
        prompt: &str,
        edit_type: EditType,
        reference_image: Option<Vec<u8>>,
        negative_prompt: Option<String>,
    ) -> Self {
        let trimmed = prompt.trim();
        let instruction = if trimmed.is_empty() {
            edit_type.default_instruction().to_string()
        } else {
            trimmed.to_string()
        };
        Self {
            source_image,
            instruction,
            reference_image,
            edit_type,
            negative_prompt: negative_prompt
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            seed: None,
        }
    }

    /// Pins the generation seed so repeated edits of the same input match.
    pub fn with_seed(mut self, seed: Option<u32>) -> Self {
        self.seed = seed;
        self
    }
}

/// Inbound JSON body of `POST /edit-image`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditPayload {
    pub image_base64: String,
    #[serde(default)]
    pub prompt: String,
    pub edit_type: String,
    #[serde(default)]
    pub reference_image_base64: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub seed: Option<u32>,
}

impl EditPayload {
    pub fn into_request(self) -> Result<EditRequest> {
        let source_image = decode_base64_image(&self.image_base64).context("imageBase64")?;
        let reference_image = match self
            .reference_image_base64
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(raw) => Some(decode_base64_image(raw).context("referenceImageBase64")?),
            None => None,
        };
        if let Some(seed) = self.seed.filter(|seed| *seed > MAX_SEED) {
            bail!("seed {seed} is out of range (0..={MAX_SEED})");
        }
        Ok(EditRequest::new(
            source_image,
            &self.prompt,
            EditType::parse(&self.edit_type),
            reference_image,
            self.negative_prompt,
        )
        .with_seed(self.seed))
    }
}

/// Decodes plain base64 or a `data:<mime>;base64,<payload>` URL.
pub fn decode_base64_image(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    let payload = if trimmed.starts_with("data:") {
        let (meta, payload) = trimmed
            .split_once(',')
            .context("data URL is missing its payload")?;
        if !meta.ends_with(";base64") {
            bail!("data URL is not base64 encoded");
        }
        payload
    } else {
        trimmed
    };
    if payload.is_empty() {
        bail!("image payload is empty");
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .context("invalid base64 image payload")?;
    if bytes.is_empty() {
        bail!("image payload is empty");
    }
    Ok(bytes)
}
