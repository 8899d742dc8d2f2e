mod dryrun;
mod gemini;
mod reply;

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use freshcheck_contracts::analysis::{AnalysisFailure, AnalysisResult, UNSUPPORTED_SUBJECT_MESSAGE};
use freshcheck_contracts::capture::CapturedImage;
use freshcheck_contracts::events::{EventPayload, EventWriter};
use serde_json::{json, Value};
use thiserror::Error;

pub use dryrun::{DryrunProvider, DRYRUN_MODEL};
pub use gemini::{GeminiProvider, DEFAULT_GEMINI_MODEL};
pub use reply::{decode_reply, extract_first_json_object};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 1.0,
            top_k: 32,
            max_output_tokens: 4096,
        }
    }
}

/// One inference call: instruction plus a single inline image.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub instruction: String,
    pub mime_type: String,
    /// Standard base64 of the image bytes.
    pub image_base64: String,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Transport(String),
    #[error("inference endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("inference response malformed: {0}")]
    Envelope(String),
}

impl InferenceError {
    fn into_failure(self) -> AnalysisFailure {
        match self {
            InferenceError::Transport(_) | InferenceError::Status { .. } => {
                AnalysisFailure::transport()
            }
            InferenceError::Envelope(_) => AnalysisFailure::unexpected(),
        }
    }
}

/// Remote multimodal model. Returns the model's reply text.
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError>;
}

#[derive(Default)]
pub struct InferenceProviderRegistry {
    providers: BTreeMap<String, Arc<dyn InferenceProvider>>,
}

impl InferenceProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: InferenceProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InferenceProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// `dryrun` models go to the canned provider, everything else to Gemini.
    pub fn for_model(&self, model: &str) -> Option<Arc<dyn InferenceProvider>> {
        if model.trim().starts_with("dryrun") {
            return self.get("dryrun");
        }
        self.get("gemini")
    }
}

pub fn default_provider_registry(gemini: GeminiProvider) -> InferenceProviderRegistry {
    let mut registry = InferenceProviderRegistry::new();
    registry.register(DryrunProvider);
    registry.register(gemini);
    registry
}

/// Fixed instruction sent with every image.
pub fn analysis_instruction() -> String {
    let schema = json!({
        "Identification": {"name": "", "varieties": ""},
        "QualityCheck": {"rate": "Good | Average | Bad", "reason": ""},
        "NutritionInfo": {
            "calories": "", "protein": "", "carbohydrates": "",
            "fats": "", "fiber": "", "waterContent": ""
        },
        "RecipeSuggestions": [{"name": "", "steps": "", "youtube_url": ""}],
        "StorageAdvice": {"method": "", "expiry_duration": ""},
        "FridgeReminder": "",
        "LeaderboardInfo": "1 upload for leaderboard tracking",
        "FunFact": "",
        "ArtificialCoatingDetection": {"signs": "", "confidence": "80%"}
    });
    let schema_text = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
    let error_text = json!({ "error": UNSUPPORTED_SUBJECT_MESSAGE }).to_string();
    format!(
        "When a user uploads an image of a fruit or vegetable, respond with a single JSON object \
         in exactly this format:\n{schema_text}\n\n\
         Restriction:\nIf the image is not a fruit or vegetable, return: {error_text}"
    )
}

/// Turns a captured image into one inference round trip and decodes the reply.
#[derive(Clone)]
pub struct AnalysisRequestBuilder {
    provider: Arc<dyn InferenceProvider>,
    model: String,
    generation: GenerationConfig,
    events: EventWriter,
}

impl AnalysisRequestBuilder {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        model: impl Into<String>,
        events: EventWriter,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            generation: GenerationConfig::default(),
            events,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn build_request(&self, image: &CapturedImage) -> InferenceRequest {
        InferenceRequest {
            model: self.model.clone(),
            instruction: analysis_instruction(),
            mime_type: image.mime_type().to_string(),
            image_base64: BASE64.encode(image.bytes()),
            generation: self.generation,
        }
    }

    /// Single attempt, no retry, no cache.
    pub fn analyze(&self, image: &CapturedImage) -> AnalysisResult {
        let request = self.build_request(image);
        let reply = match self.provider.generate(&request) {
            Ok(reply) => reply,
            Err(err) => {
                let mut payload = EventPayload::new();
                payload.insert("provider".to_string(), json!(self.provider.name()));
                payload.insert("model".to_string(), json!(self.model));
                payload.insert("error".to_string(), json!(err.to_string()));
                self.events.note("inference_failed", payload);
                return err.into_failure().into();
            }
        };

        let result = decode_reply(&reply);
        if let Some(assessment) = result.assessment() {
            let missing = assessment.missing_sections();
            if !missing.is_empty() {
                let mut payload = EventPayload::new();
                payload.insert("missing".to_string(), json!(missing));
                self.events.note("analysis_sections_missing", payload);
            }
        } else if let Some(failure) = result.failure() {
            let mut payload = EventPayload::new();
            payload.insert("kind".to_string(), json!(failure.kind.as_str()));
            payload.insert("reply_chars".to_string(), Value::from(reply.chars().count()));
            self.events.note("analysis_rejected", payload);
        }
        result
    }
}
