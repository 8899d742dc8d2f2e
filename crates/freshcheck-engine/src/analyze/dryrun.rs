use serde_json::json;

use super::{InferenceError, InferenceProvider, InferenceRequest};

pub const DRYRUN_MODEL: &str = "dryrun";

/// Offline provider: answers every request with the same canned assessment,
/// wrapped in prose the way real model replies usually are.
pub struct DryrunProvider;

impl InferenceProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        if request.image_base64.is_empty() {
            return Ok(json!({ "error": "No image data was provided." }).to_string());
        }
        let body = json!({
            "Identification": {"name": "Apple", "varieties": "Gala, Fuji, Honeycrisp"},
            "QualityCheck": {
                "rate": "Good",
                "reason": "Firm skin with even colour and no visible bruising."
            },
            "NutritionInfo": {
                "calories": "52 kcal per 100g",
                "protein": "0.3g",
                "carbohydrates": "14g",
                "fats": "0.2g",
                "fiber": "2.4g",
                "waterContent": "86%"
            },
            "RecipeSuggestions": [{
                "name": "Baked cinnamon apples",
                "steps": "Core the apples, fill with oats, cinnamon and honey, then bake at 180C for 30 minutes.",
                "youtube_url": "https://www.youtube.com/results?search_query=baked+cinnamon+apples"
            }],
            "StorageAdvice": {"method": "Refrigerate in the crisper drawer", "expiry_duration": "4-6 weeks"},
            "FridgeReminder": "Keep away from leafy greens; apples release ethylene.",
            "LeaderboardInfo": "1 upload for leaderboard tracking",
            "FunFact": "Apples float because a quarter of their volume is air.",
            "ArtificialCoatingDetection": {"signs": "Slight waxy sheen on the skin", "confidence": "60%"}
        });
        Ok(format!(
            "Here is the analysis of your produce:\n```json\n{}\n```",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        ))
    }
}
