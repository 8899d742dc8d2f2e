use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::analysis::{CoatingDetection, NutritionInfo, ProduceAssessment, QualityRate, Recipe};

/// Entries shown on the leaderboard.
pub const LEADERBOARD_SIZE: usize = 20;

/// Row payload for the history table, everything list and detail views need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub user_id: String,
    pub image_url: String,
    pub item_name: String,
    pub status: QualityRate,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub varieties: Option<String>,
    #[serde(default)]
    pub quality_reason: Option<String>,
    #[serde(default)]
    pub nutrition_details: Option<NutritionInfo>,
    #[serde(default)]
    pub recipes: Option<Vec<Recipe>>,
    #[serde(default)]
    pub storage_advice: Option<String>,
    #[serde(default)]
    pub expiry_duration: Option<String>,
    #[serde(default)]
    pub fun_fact: Option<String>,
    #[serde(default)]
    pub artificial_coating: Option<CoatingDetection>,
}

impl NewHistoryRecord {
    pub fn from_assessment(
        owner_id: &str,
        image_url: &str,
        assessment: &ProduceAssessment,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let identification = assessment.identification.as_ref();
        let quality = assessment.quality_check.as_ref();
        let storage = assessment.storage.as_ref();
        Self {
            user_id: owner_id.to_string(),
            image_url: image_url.to_string(),
            item_name: assessment.item_name().to_string(),
            status: assessment.rate(),
            date: recorded_at,
            varieties: identification.map(|section| section.varieties.clone()),
            quality_reason: quality.map(|section| section.reason.clone()),
            nutrition_details: assessment.nutrition.clone(),
            recipes: assessment.recipes.clone(),
            storage_advice: storage.map(|section| section.method.clone()),
            expiry_duration: storage.map(|section| section.expiry_duration.clone()),
            fun_fact: assessment.fun_fact.clone(),
            artificial_coating: assessment.coating.clone(),
        }
    }
}

/// A persisted analysis as stored by the metadata backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(deserialize_with = "row_id")]
    pub id: String,
    #[serde(flatten)]
    pub record: NewHistoryRecord,
}

impl HistoryRecord {
    pub fn owner_id(&self) -> &str {
        &self.record.user_id
    }

    pub fn display_date(&self) -> String {
        format_history_date(self.record.date)
    }
}

/// Row ids arrive as uuid strings or bigint numbers depending on the table.
fn row_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported row id: {other}"
        ))),
    }
}

pub fn format_history_date(date: DateTime<Utc>) -> String {
    date.format("%b %-d, %Y").to_string()
}

/// Per-owner count as returned by the leaderboard query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileScanCount {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub scan_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub identity: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub scan_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    /// 1-based position of the viewer across all owners, not just the top slice.
    pub viewer_rank: Option<usize>,
}

pub fn rank_leaderboard(rows: Vec<ProfileScanCount>, viewer: Option<&str>) -> Leaderboard {
    let mut entries: Vec<LeaderboardEntry> = rows
        .into_iter()
        .map(|row| LeaderboardEntry {
            display_name: display_name(row.name.as_deref(), row.email.as_deref()),
            identity: row.id,
            avatar_url: row.avatar_url,
            scan_count: row.scan_count,
        })
        .collect();
    // Stable: ties keep the backend's row order (profiles by name).
    entries.sort_by(|left, right| right.scan_count.cmp(&left.scan_count));

    let viewer_rank = viewer.and_then(|viewer| {
        entries
            .iter()
            .position(|entry| entry.identity == viewer)
            .map(|idx| idx + 1)
    });
    entries.truncate(LEADERBOARD_SIZE);
    Leaderboard {
        entries,
        viewer_rank,
    }
}

fn display_name(name: Option<&str>, email: Option<&str>) -> String {
    if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
        return name.to_string();
    }
    email
        .and_then(|email| email.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .unwrap_or("Anonymous")
        .to_string()
}
