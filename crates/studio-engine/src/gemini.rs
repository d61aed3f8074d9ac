use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use studio_contracts::assets::ImageAsset;
use studio_contracts::config::StudioConfig;
use studio_contracts::errors::CapabilityError;
use studio_contracts::request::{GenerationRequest, RequestPart};
use tracing::debug;

use crate::capability::{ChatSession, GenerationCapability};

const API_KEY_HEADER: &str = "x-goog-api-key";
const ERROR_BODY_MAX_CHARS: usize = 512;
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Shared transport for every Gemini call. Cloning is cheap.
#[derive(Clone)]
struct GeminiTransport {
    http: HttpClient,
    api_base: String,
    api_key: String,
}

impl GeminiTransport {
    fn endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn post(&self, endpoint: &str, payload: &Value) -> Result<Value, CapabilityError> {
        debug!(endpoint, "gemini request");
        let response = self
            .http
            .post(endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .map_err(|err| CapabilityError::new(format!("Gemini request failed ({endpoint}): {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| CapabilityError::new(format!("Gemini response body read failed: {err}")))?;
        if !status.is_success() {
            return Err(CapabilityError::new(format!(
                "Gemini request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, ERROR_BODY_MAX_CHARS)
            )));
        }
        serde_json::from_str(&body)
            .map_err(|err| CapabilityError::new(format!("Gemini returned invalid JSON payload: {err}")))
    }
}

/// Google generative language API: Imagen for batch generation, the Gemini
/// image model for scenes and edits, a Gemini text model for chat.
pub struct GeminiCapability {
    transport: GeminiTransport,
    generate_model: String,
    image_model: String,
    chat_model: String,
}

impl GeminiCapability {
    pub fn new(config: &StudioConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            transport: GeminiTransport {
                http,
                api_base: config.api_base.trim_end_matches('/').to_string(),
                api_key: config.api_key.clone(),
            },
            generate_model: config.generate_model.clone(),
            image_model: config.image_model.clone(),
            chat_model: config.chat_model.clone(),
        })
    }

    fn single_image(&self, request: &GenerationRequest) -> Result<ImageAsset, CapabilityError> {
        let endpoint = self.transport.endpoint(&self.image_model, "generateContent");
        let response = self
            .transport
            .post(&endpoint, &build_image_payload(request))?;
        extract_inline_image(&response)
    }
}

impl GenerationCapability for GeminiCapability {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<ImageAsset>, CapabilityError> {
        let endpoint = self.transport.endpoint(&self.generate_model, "predict");
        let response = self
            .transport
            .post(&endpoint, &build_predict_payload(request, count))?;
        let images = extract_predictions(&response)?;
        if images.is_empty() {
            return Err(no_image_error(&response));
        }
        Ok(images)
    }

    fn generate_scene(&self, request: &GenerationRequest) -> Result<ImageAsset, CapabilityError> {
        self.single_image(request)
    }

    fn edit_image(&self, request: &GenerationRequest) -> Result<ImageAsset, CapabilityError> {
        if request.reference_assets.is_empty() {
            return Err(CapabilityError::new("edit request has no source image"));
        }
        self.single_image(request)
    }

    fn open_session(
        &self,
        system_instruction: &str,
    ) -> Result<Box<dyn ChatSession>, CapabilityError> {
        Ok(Box::new(GeminiChatSession {
            transport: self.transport.clone(),
            endpoint: self.transport.endpoint(&self.chat_model, "generateContent"),
            system_instruction: system_instruction.to_string(),
            history: Vec::new(),
        }))
    }
}

/// Conversation state lives client-side as the `contents` history the API
/// expects on every turn.
pub struct GeminiChatSession {
    transport: GeminiTransport,
    endpoint: String,
    system_instruction: String,
    history: Vec<Value>,
}

impl ChatSession for GeminiChatSession {
    fn send(&mut self, text: &str) -> Result<String, CapabilityError> {
        let payload = build_chat_payload(&self.system_instruction, &self.history, text);
        let response = self.transport.post(&self.endpoint, &payload)?;
        let reply = extract_text(&response);
        if reply.is_empty() {
            return Err(no_text_error(&response));
        }
        // A failed turn leaves the history untouched.
        self.history.push(text_content("user", text));
        self.history.push(text_content("model", &reply));
        Ok(reply)
    }
}

pub(crate) fn build_predict_payload(request: &GenerationRequest, count: usize) -> Value {
    let mut parameters = Map::new();
    parameters.insert(
        "sampleCount".to_string(),
        Value::Number(count.max(1).into()),
    );
    if let Some(ratio) = request.structured_ratio() {
        parameters.insert(
            "aspectRatio".to_string(),
            Value::String(ratio.as_str().to_string()),
        );
    }
    json!({
        "instances": [{
            "prompt": request.prompt_text,
        }],
        "parameters": parameters,
    })
}

pub(crate) fn build_image_payload(request: &GenerationRequest) -> Value {
    let parts = request
        .parts()
        .into_iter()
        .map(|part| match part {
            RequestPart::Text(text) => json!({ "text": text }),
            RequestPart::Asset(asset) => json!({
                "inlineData": {
                    "mimeType": asset.mime_type(),
                    "data": asset.data(),
                }
            }),
        })
        .collect::<Vec<Value>>();
    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
        },
    })
}

pub(crate) fn build_chat_payload(system_instruction: &str, history: &[Value], text: &str) -> Value {
    let mut contents = history.to_vec();
    contents.push(text_content("user", text));
    let mut payload = Map::new();
    if !system_instruction.trim().is_empty() {
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system_instruction }] }),
        );
    }
    payload.insert("contents".to_string(), Value::Array(contents));
    Value::Object(payload)
}

fn text_content(role: &str, text: &str) -> Value {
    json!({
        "role": role,
        "parts": [{ "text": text }],
    })
}

pub(crate) fn extract_predictions(response: &Value) -> Result<Vec<ImageAsset>, CapabilityError> {
    let mut out = Vec::new();
    let predictions = response
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in predictions {
        let Some(obj) = row.as_object() else {
            continue;
        };
        let Some(encoded) = obj
            .get("bytesBase64Encoded")
            .or_else(|| obj.get("bytes_base64_encoded"))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|err| CapabilityError::new(format!("Imagen image base64 decode failed: {err}")))?;
        let mime_type = obj
            .get("mimeType")
            .or_else(|| obj.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_IMAGE_MIME);
        out.push(ImageAsset::new(bytes, mime_type));
    }
    Ok(out)
}

fn candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .flat_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        })
        .collect()
}

pub(crate) fn extract_inline_image(response: &Value) -> Result<ImageAsset, CapabilityError> {
    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| CapabilityError::new(format!("Gemini image base64 decode failed: {err}")))?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_IMAGE_MIME);
        return Ok(ImageAsset::new(bytes, mime_type));
    }
    Err(no_image_error(response))
}

pub(crate) fn extract_text(response: &Value) -> String {
    candidate_parts(response)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
        .trim()
        .to_string()
}

/// Why the service answered without an image: block reason, finish reason,
/// or whatever text the model sent instead.
fn refusal_reason(response: &Value) -> Option<String> {
    if let Some(reason) = response
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Some(format!("prompt blocked ({reason})"));
    }
    let text = extract_text(response);
    if !text.is_empty() {
        return Some(truncate_text(&text, 200));
    }
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)
        .filter(|reason| *reason != "STOP")
        .map(|reason| format!("finish reason {reason}"))
}

fn no_image_error(response: &Value) -> CapabilityError {
    match refusal_reason(response) {
        Some(reason) => CapabilityError::new(format!("no image returned: {reason}")),
        None => CapabilityError::new("no image returned; the request may have been filtered"),
    }
}

fn no_text_error(response: &Value) -> CapabilityError {
    match refusal_reason(response) {
        Some(reason) => CapabilityError::new(format!("empty chat reply: {reason}")),
        None => CapabilityError::new("empty chat reply"),
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use studio_contracts::assets::encode_bytes;
    use studio_contracts::request::{AspectRatio, EditPlan, GeneratePlan, StoryboardPlan};

    use super::*;

    fn config() -> StudioConfig {
        StudioConfig {
            api_key: "test-key".to_string(),
            api_base: "https://example.test/v1beta/".to_string(),
            generate_model: "imagen-4.0-generate-001".to_string(),
            image_model: "models/gemini-2.5-flash-image-preview".to_string(),
            chat_model: "gemini-2.5-flash".to_string(),
            request_timeout: Duration::from_secs(30),
            system_instruction: "be brief".to_string(),
        }
    }

    #[test]
    fn endpoints_normalize_model_paths() -> anyhow::Result<()> {
        let capability = GeminiCapability::new(&config())?;
        assert_eq!(
            capability
                .transport
                .endpoint(&capability.generate_model, "predict"),
            "https://example.test/v1beta/models/imagen-4.0-generate-001:predict"
        );
        assert_eq!(
            capability
                .transport
                .endpoint(&capability.image_model, "generateContent"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
        Ok(())
    }

    #[test]
    fn predict_payload_carries_structured_ratio_only_when_set() -> anyhow::Result<()> {
        let request = GeneratePlan {
            prompt: "A hero discovers a glowing orb".to_string(),
            aspect_ratio: AspectRatio::Landscape,
        }
        .build()?;
        let payload = build_predict_payload(&request, 4);
        assert_eq!(
            payload,
            json!({
                "instances": [{"prompt": "A hero discovers a glowing orb"}],
                "parameters": {"sampleCount": 4, "aspectRatio": "16:9"},
            })
        );

        let original = GeneratePlan {
            prompt: "orb".to_string(),
            aspect_ratio: AspectRatio::Original,
        }
        .build()?;
        assert!(build_predict_payload(&original, 4)["parameters"]
            .get("aspectRatio")
            .is_none());
        Ok(())
    }

    #[test]
    fn image_payload_orders_inline_assets_before_text() -> anyhow::Result<()> {
        let request = EditPlan {
            prompt: "add snow".to_string(),
            source: Some(encode_bytes(b"src", "image/png")),
            reference: Some(encode_bytes(b"ref", "image/jpeg")),
            aspect_ratio: AspectRatio::Square,
        }
        .build()?;
        let payload = build_image_payload(&request);
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!(BASE64.encode(b"src")));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[2]["text"], json!("add snow\n\nOutput aspect ratio: 1:1."));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
        Ok(())
    }

    #[test]
    fn scene_payload_attaches_character_references() -> anyhow::Result<()> {
        let requests = StoryboardPlan {
            scenes: vec!["The hero wakes".to_string()],
            characters: vec![
                encode_bytes(b"hero", "image/png"),
                encode_bytes(b"sidekick", "image/png"),
            ],
            aspect_ratio: AspectRatio::Original,
        }
        .build()?;
        let parts = build_image_payload(&requests[0])["contents"][0]["parts"].clone();
        assert_eq!(parts.as_array().map(Vec::len), Some(3));
        Ok(())
    }

    #[test]
    fn chat_payload_appends_turn_after_history() {
        let history = vec![text_content("user", "hi"), text_content("model", "hello!")];
        let payload = build_chat_payload("be brief", &history, "draw me a cat");
        assert_eq!(
            payload["systemInstruction"],
            json!({"parts": [{"text": "be brief"}]})
        );
        let contents = payload["contents"].as_array().cloned().unwrap_or_default();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[2], json!({"role": "user", "parts": [{"text": "draw me a cat"}]}));

        let bare = build_chat_payload("  ", &[], "x");
        assert!(bare.get("systemInstruction").is_none());
    }

    #[test]
    fn predictions_decode_in_order_with_mime_defaults() -> anyhow::Result<()> {
        let response = json!({
            "predictions": [
                {"bytesBase64Encoded": BASE64.encode(b"one"), "mimeType": "image/jpeg"},
                {"raiFilteredReason": "filtered"},
                {"bytesBase64Encoded": BASE64.encode(b"two")},
            ]
        });
        let images = extract_predictions(&response)?;
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].bytes, b"one".to_vec());
        assert_eq!(images[0].mime_type, "image/jpeg");
        assert_eq!(images[1].mime_type, DEFAULT_IMAGE_MIME);
        Ok(())
    }

    #[test]
    fn inline_image_is_found_after_text_parts() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(b"img")}},
                ]}
            }]
        });
        let image = extract_inline_image(&response)?;
        assert_eq!(image.bytes, b"img".to_vec());
        Ok(())
    }

    #[test]
    fn missing_image_reports_block_reason_or_model_text() {
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = extract_inline_image(&blocked).err().map(|err| err.cause);
        assert_eq!(err.as_deref(), Some("no image returned: prompt blocked (SAFETY)"));

        let refused = json!({
            "candidates": [{"content": {"parts": [{"text": "I can't edit that image."}]}}]
        });
        let err = extract_inline_image(&refused).err().map(|err| err.cause);
        assert_eq!(err.as_deref(), Some("no image returned: I can't edit that image."));

        let empty = json!({"candidates": [{"finishReason": "IMAGE_SAFETY"}]});
        let err = extract_inline_image(&empty).err().map(|err| err.cause);
        assert_eq!(err.as_deref(), Some("no image returned: finish reason IMAGE_SAFETY"));
    }

    #[test]
    fn text_parts_are_joined() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "there."}]}}]
        });
        assert_eq!(extract_text(&response), "Hello there.");
        assert_eq!(extract_text(&json!({})), "");
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
