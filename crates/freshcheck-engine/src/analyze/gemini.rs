use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::http::truncate_text;

use super::{InferenceError, InferenceProvider, InferenceRequest};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        let api_base = api_base.into();
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_GEMINI_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            api_key,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn build_payload(request: &InferenceRequest) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "text": request.instruction },
                    {
                        "inline_data": {
                            "mime_type": request.mime_type,
                            "data": request.image_base64,
                        }
                    }
                ]
            }],
            "generation_config": {
                "temperature": request.generation.temperature,
                "top_p": request.generation.top_p,
                "top_k": request.generation.top_k,
                "max_output_tokens": request.generation.max_output_tokens,
            }
        })
    }

    /// Concatenated text parts of the first candidate.
    pub fn extract_reply_text(response_payload: &Value) -> Option<String> {
        let parts = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)?;
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("");
        if text.trim().is_empty() {
            return None;
        }
        Some(text)
    }
}

impl InferenceProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(InferenceError::Transport(
                "Missing GEMINI_API_KEY (or GOOGLE_API_KEY).".to_string(),
            ));
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| InferenceError::Transport(format!("Gemini request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| InferenceError::Transport(format!("Gemini body read failed: {err}")))?;
        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: truncate_text(&body, 512),
            });
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| InferenceError::Envelope(format!("Gemini returned invalid JSON: {err}")))?;
        Self::extract_reply_text(&parsed)
            .ok_or_else(|| InferenceError::Envelope("Gemini response had no candidate text".to_string()))
    }
}
