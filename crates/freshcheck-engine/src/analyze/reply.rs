use freshcheck_contracts::analysis::{
    AnalysisFailure, AnalysisResult, ProduceAssessment, ASSESSMENT_SECTION_KEYS,
    UNSUPPORTED_SUBJECT_MESSAGE,
};
use serde_json::{Map, Value};

/// Finds the first `{...}` span in free text that parses as a JSON object.
///
/// The model is asked for bare JSON but often wraps it in prose or a code
/// fence; a stray brace in the prose is skipped.
pub fn extract_first_json_object(text: &str) -> Option<Map<String, Value>> {
    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(object))) = stream.next() {
            return Some(object);
        }
    }
    None
}

/// Decodes the model's reply text into a result.
pub fn decode_reply(text: &str) -> AnalysisResult {
    let Some(object) = extract_first_json_object(text) else {
        return AnalysisFailure::parse().into();
    };

    if let Some(error) = object.get("error") {
        let message = match error {
            Value::String(message) if !message.trim().is_empty() => message.clone(),
            Value::String(_) | Value::Null => UNSUPPORTED_SUBJECT_MESSAGE.to_string(),
            other => other.to_string(),
        };
        return AnalysisFailure::unsupported_subject(message).into();
    }

    if !ASSESSMENT_SECTION_KEYS
        .iter()
        .any(|key| object.contains_key(*key))
    {
        return AnalysisFailure::parse().into();
    }

    match serde_json::from_value::<ProduceAssessment>(Value::Object(object)) {
        Ok(assessment) => AnalysisResult::success(assessment),
        Err(_) => AnalysisFailure::parse().into(),
    }
}

#[cfg(test)]
mod tests {
    use freshcheck_contracts::analysis::{FailureKind, QualityRate};
    use serde_json::json;

    use super::*;

    fn success_fixture() -> Value {
        json!({
            "Identification": {"name": "Tomato", "varieties": "Roma"},
            "QualityCheck": {"rate": "Good", "reason": "Firm and red"},
            "NutritionInfo": {
                "calories": "18 kcal", "protein": "0.9g", "carbohydrates": "3.9g",
                "fats": "0.2g", "fiber": "1.2g", "waterContent": "95%"
            },
            "RecipeSuggestions": [
                {"name": "Salsa", "steps": "Dice, mix, season.", "youtube_url": "https://youtu.be/s"}
            ],
            "StorageAdvice": {"method": "Room temperature", "expiry_duration": "5 days"},
            "FridgeReminder": "Only refrigerate once cut.",
            "LeaderboardInfo": "1 upload for leaderboard tracking",
            "FunFact": "Botanically a fruit.",
            "ArtificialCoatingDetection": {"signs": "None visible", "confidence": "80%"}
        })
    }

    #[test]
    fn embedded_object_decodes_exactly() -> anyhow::Result<()> {
        let fixture = success_fixture();
        let reply = format!(
            "Sure! Here is the analysis you asked for:\n```json\n{}\n```\nLet me know if you need more.",
            serde_json::to_string_pretty(&fixture)?
        );

        let result = decode_reply(&reply);
        let assessment = result.assessment().expect("success result");
        assert_eq!(serde_json::to_value(assessment)?, fixture);
        assert_eq!(assessment.rate(), QualityRate::Good);
        assert!(assessment.missing_sections().is_empty());
        Ok(())
    }

    #[test]
    fn stray_brace_before_payload_is_skipped() {
        let reply = format!("Result {{draft}} follows: {}", success_fixture());
        assert!(decode_reply(&reply).is_success());
    }

    #[test]
    fn error_object_becomes_failure_with_exact_message() {
        let reply = r#"{"error": "Unsupported image type. Please upload a clear image of a fruit or vegetable."}"#;
        let result = decode_reply(reply);
        let failure = result.failure().expect("failure result");
        assert_eq!(failure.kind, FailureKind::UnsupportedSubject);
        assert_eq!(
            failure.message,
            "Unsupported image type. Please upload a clear image of a fruit or vegetable."
        );
    }

    #[test]
    fn reply_without_json_is_parse_failure() {
        for reply in [
            "I cannot help with that.",
            "",
            "{ not json at all",
            "[1, 2, 3]",
            r#"{"unrelated": true}"#,
        ] {
            let result = decode_reply(reply);
            let failure = result.failure().expect("failure result");
            assert_eq!(failure.kind, FailureKind::Parse, "reply: {reply}");
            assert_eq!(
                failure.message,
                "Failed to parse analysis results. Please try again."
            );
        }
    }

    #[test]
    fn partial_reply_is_accepted_leniently() {
        let reply = r#"{"Identification": {"name": "Lime"}, "FunFact": "Limes sink."}"#;
        let result = decode_reply(reply);
        let assessment = result.assessment().expect("success result");
        assert_eq!(assessment.item_name(), "Lime");
        assert!(assessment.quality_check().is_none());
        assert!(assessment.missing_sections().contains(&"QualityCheck"));
    }

    #[test]
    fn null_or_numeric_rate_still_decodes() {
        let null_rate = r#"{"Identification":{"name":"Lime"},"QualityCheck":{"rate":null,"reason":"unclear"}}"#;
        let result = decode_reply(null_rate);
        let assessment = result.assessment().expect("success result");
        assert_eq!(assessment.rate(), QualityRate::Unrated(String::new()));
        assert_eq!(
            assessment.quality_check().map(|check| check.reason.as_str()),
            Some("unclear")
        );

        let numeric_rate = r#"{"Identification":{"name":"Lime"},"QualityCheck":{"rate":4,"reason":""}}"#;
        let result = decode_reply(numeric_rate);
        let assessment = result.assessment().expect("success result");
        assert_eq!(assessment.rate(), QualityRate::Unrated("4".to_string()));
        assert!(assessment.quality_check().is_some());
    }

    #[test]
    fn wrongly_typed_section_is_parse_failure() {
        let reply = r#"{"Identification": "Lime", "QualityCheck": {"rate": "Good"}}"#;
        let result = decode_reply(reply);
        assert_eq!(result.failure().map(|failure| failure.kind), Some(FailureKind::Parse));
    }
}
