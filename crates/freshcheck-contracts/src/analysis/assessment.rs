use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Top-level keys the instruction asks the model to fill in.
pub const ASSESSMENT_SECTION_KEYS: [&str; 8] = [
    "Identification",
    "QualityCheck",
    "NutritionInfo",
    "RecipeSuggestions",
    "StorageAdvice",
    "FridgeReminder",
    "FunFact",
    "ArtificialCoatingDetection",
];

/// Structured produce assessment as returned by the inference model.
///
/// Every section is optional on the wire. Accessors treat a missing section
/// and an all-empty section the same way: `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProduceAssessment {
    #[serde(
        rename = "Identification",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub identification: Option<Identification>,
    #[serde(
        rename = "QualityCheck",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub quality_check: Option<QualityCheck>,
    #[serde(
        rename = "NutritionInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub nutrition: Option<NutritionInfo>,
    #[serde(
        rename = "RecipeSuggestions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub recipes: Option<Vec<Recipe>>,
    #[serde(
        rename = "StorageAdvice",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub storage: Option<StorageAdvice>,
    #[serde(
        rename = "FridgeReminder",
        default,
        deserialize_with = "lenient_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub fridge_reminder: Option<String>,
    #[serde(
        rename = "LeaderboardInfo",
        default,
        deserialize_with = "lenient_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub leaderboard_info: Option<String>,
    #[serde(
        rename = "FunFact",
        default,
        deserialize_with = "lenient_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub fun_fact: Option<String>,
    #[serde(
        rename = "ArtificialCoatingDetection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub coating: Option<CoatingDetection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identification {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub varieties: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityCheck {
    #[serde(default, deserialize_with = "lenient_rate")]
    pub rate: QualityRate,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub calories: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub protein: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub carbohydrates: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub fats: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub fiber: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub water_content: String,
}

impl NutritionInfo {
    /// Display rows in fixed order.
    pub fn rows(&self) -> [(&'static str, &str); 6] {
        [
            ("Calories", self.calories.as_str()),
            ("Protein", self.protein.as_str()),
            ("Carbohydrates", self.carbohydrates.as_str()),
            ("Fats", self.fats.as_str()),
            ("Fiber", self.fiber.as_str()),
            ("Water content", self.water_content.as_str()),
        ]
    }

    fn is_blank(&self) -> bool {
        self.rows().iter().all(|(_, value)| value.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub steps: String,
    #[serde(rename = "youtube_url", default, deserialize_with = "lenient_text")]
    pub video_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageAdvice {
    #[serde(default, deserialize_with = "lenient_text")]
    pub method: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub expiry_duration: String,
}

/// `confidence` is whatever the model wrote (usually "80%"); it is not parsed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoatingDetection {
    #[serde(default, deserialize_with = "lenient_text")]
    pub signs: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub confidence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QualityRate {
    Good,
    Average,
    Bad,
    /// Anything outside the three grades, kept verbatim.
    Unrated(String),
}

impl Default for QualityRate {
    fn default() -> Self {
        QualityRate::Unrated(String::new())
    }
}

impl QualityRate {
    pub fn as_str(&self) -> &str {
        match self {
            QualityRate::Good => "Good",
            QualityRate::Average => "Average",
            QualityRate::Bad => "Bad",
            QualityRate::Unrated(raw) => raw.as_str(),
        }
    }

    pub fn is_graded(&self) -> bool {
        !matches!(self, QualityRate::Unrated(_))
    }
}

impl From<String> for QualityRate {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "good" => QualityRate::Good,
            "average" => QualityRate::Average,
            "bad" => QualityRate::Bad,
            _ => QualityRate::Unrated(raw),
        }
    }
}

impl From<QualityRate> for String {
    fn from(rate: QualityRate) -> Self {
        rate.as_str().to_string()
    }
}

impl fmt::Display for QualityRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProduceAssessment {
    pub fn identification(&self) -> Option<&Identification> {
        self.identification
            .as_ref()
            .filter(|section| !section.name.trim().is_empty())
    }

    pub fn quality_check(&self) -> Option<&QualityCheck> {
        self.quality_check.as_ref().filter(|section| {
            !section.rate.as_str().trim().is_empty()
                || !section.reason.trim().is_empty()
        })
    }

    pub fn nutrition(&self) -> Option<&NutritionInfo> {
        self.nutrition.as_ref().filter(|section| !section.is_blank())
    }

    pub fn recipes(&self) -> Option<&[Recipe]> {
        self.recipes
            .as_deref()
            .filter(|recipes| !recipes.is_empty())
    }

    pub fn storage(&self) -> Option<&StorageAdvice> {
        self.storage.as_ref().filter(|section| {
            !section.method.trim().is_empty() || !section.expiry_duration.trim().is_empty()
        })
    }

    pub fn fridge_reminder(&self) -> Option<&str> {
        non_blank(self.fridge_reminder.as_deref())
    }

    pub fn fun_fact(&self) -> Option<&str> {
        non_blank(self.fun_fact.as_deref())
    }

    pub fn coating(&self) -> Option<&CoatingDetection> {
        self.coating
            .as_ref()
            .filter(|section| !section.signs.trim().is_empty())
    }

    /// Name used in titles and history rows; empty when the model omitted it.
    pub fn item_name(&self) -> &str {
        self.identification
            .as_ref()
            .map(|section| section.name.as_str())
            .unwrap_or_default()
    }

    pub fn rate(&self) -> QualityRate {
        self.quality_check
            .as_ref()
            .map(|section| section.rate.clone())
            .unwrap_or_default()
    }

    /// Wire keys the model left out of its reply.
    pub fn missing_sections(&self) -> Vec<&'static str> {
        let present = [
            self.identification.is_some(),
            self.quality_check.is_some(),
            self.nutrition.is_some(),
            self.recipes.is_some(),
            self.storage.is_some(),
            self.fridge_reminder.is_some(),
            self.fun_fact.is_some(),
            self.coating.is_some(),
        ];
        ASSESSMENT_SECTION_KEYS
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(key, _)| *key)
            .collect()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

fn lenient_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        other => Ok(Some(value_to_text(other))),
    }
}

fn lenient_rate<'de, D>(deserializer: D) -> Result<QualityRate, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_text(deserializer).map(QualityRate::from)
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}
