use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use retouch_contracts::edits::EditRequest;
use serde_json::{json, Value};

use crate::codec::sniff_mime;
use crate::config::GenerationSettings;
use crate::{map_object, response_json_or_error};

/// Raw outcome of one generation call. The payload is kept as-is and only
/// walked afterwards by [`locate_generated_images`].
#[derive(Debug, Clone)]
pub struct ProviderEditResponse {
    pub payload: Value,
}

impl ProviderEditResponse {
    pub fn usage(&self) -> Option<Value> {
        self.payload.get("usage").filter(|usage| !usage.is_null()).cloned()
    }

    pub fn request_id(&self) -> Option<String> {
        self.payload
            .get("request_id")
            .or_else(|| self.payload.get("id"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Locator of an image produced upstream. Valid only for the invocation that
/// received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub locator: String,
}

pub trait EditProvider: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, request: &EditRequest) -> Result<ProviderEditResponse>;
}

pub struct DashScopeProvider {
    api_base: String,
    api_key: String,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

impl DashScopeProvider {
    pub fn new(settings: &GenerationSettings) -> Result<Self> {
        let Some(api_key) = settings.api_key.clone() else {
            bail!("DASHSCOPE_API_KEY not set");
        };
        Ok(Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            timeout: settings.request_timeout,
            http: HttpClient::new(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/services/aigc/multimodal-generation/generation",
            self.api_base
        )
    }

    fn build_payload(&self, request: &EditRequest) -> Value {
        let mut content = vec![json!({ "image": image_data_url(&request.source_image) })];
        if let Some(reference) = request.reference_image.as_deref() {
            content.push(json!({ "image": image_data_url(reference) }));
        }
        content.push(json!({ "text": request.instruction }));

        let mut parameters = map_object(json!({ "watermark": false }));
        if let Some(negative) = request.negative_prompt.as_deref() {
            parameters.insert(
                "negative_prompt".to_string(),
                Value::String(negative.to_string()),
            );
        }
        if let Some(seed) = request.seed {
            parameters.insert("seed".to_string(), json!(seed));
        }

        json!({
            "model": self.model,
            "input": {
                "messages": [{
                    "role": "user",
                    "content": content,
                }],
            },
            "parameters": parameters,
        })
    }
}

impl EditProvider for DashScopeProvider {
    fn name(&self) -> &str {
        "dashscope"
    }

    fn edit(&self, request: &EditRequest) -> Result<ProviderEditResponse> {
        let endpoint = self.endpoint();
        let payload = self.build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("DashScope request failed ({endpoint})"))?;
        let payload = response_json_or_error("DashScope", response)?;
        Ok(ProviderEditResponse { payload })
    }
}

/// Every image locator in the response, in document order.
///
/// Walks `choices[*].message.content[*]`, under `output` or at the top level,
/// and never fails: an unexpected shape simply yields nothing.
pub fn locate_generated_images(payload: &Value) -> Vec<GeneratedImage> {
    let choices = payload
        .get("output")
        .and_then(|output| output.get("choices"))
        .or_else(|| payload.get("choices"))
        .and_then(Value::as_array);
    let Some(choices) = choices else {
        return Vec::new();
    };

    let mut out: Vec<GeneratedImage> = Vec::new();
    for choice in choices {
        let Some(content) = choice
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for element in content {
            if let Some(locator) = image_locator(element) {
                if !out.iter().any(|existing| existing.locator == locator) {
                    out.push(GeneratedImage { locator });
                }
            }
        }
    }
    out
}

pub fn locate_generated_image(payload: &Value) -> Option<GeneratedImage> {
    locate_generated_images(payload).into_iter().next()
}

fn image_locator(element: &Value) -> Option<String> {
    let obj = element.as_object()?;
    let raw = obj.get("image").and_then(Value::as_str).or_else(|| {
        obj.get("image_url").and_then(|image_url| {
            image_url
                .as_str()
                .or_else(|| image_url.get("url").and_then(Value::as_str))
        })
    })?;
    Some(raw.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn image_data_url(bytes: &[u8]) -> String {
    let mime = sniff_mime(bytes).unwrap_or("image/png");
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}
