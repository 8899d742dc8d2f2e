use std::borrow::Cow;
use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::analysis::{AnalysisResult, ProduceAssessment, QualityRate};

/// Recipe steps longer than this are cut for list display.
pub const RECIPE_STEPS_PREVIEW_CHARS: usize = 200;

pub const SHARE_UNSUPPORTED_NOTICE: &str =
    "Sharing not supported: no share target is available on this platform.";

#[derive(Debug, Clone, PartialEq)]
pub enum Section<'a> {
    Identification {
        name: &'a str,
        varieties: &'a str,
    },
    QualityCheck {
        rate: &'a QualityRate,
        reason: &'a str,
    },
    NutritionInfo(IndexMap<&'static str, &'a str>),
    StorageAdvice {
        method: &'a str,
        expiry_duration: &'a str,
    },
    FridgeReminder(&'a str),
    RecipeSuggestions(Vec<RecipeCard<'a>>),
    FunFact(&'a str),
    CoatingDetection {
        signs: &'a str,
        confidence: &'a str,
    },
}

impl Section<'_> {
    pub fn title(&self) -> &'static str {
        match self {
            Section::Identification { .. } => "Identification",
            Section::QualityCheck { .. } => "Quality Check",
            Section::NutritionInfo(_) => "Nutrition Info",
            Section::StorageAdvice { .. } => "Storage Advice",
            Section::FridgeReminder(_) => "Fridge Reminder",
            Section::RecipeSuggestions(_) => "Recipe Suggestions",
            Section::FunFact(_) => "Fun Fact",
            Section::CoatingDetection { .. } => "Artificial Coating Detection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipeCard<'a> {
    pub name: &'a str,
    pub steps_preview: Cow<'a, str>,
    pub video_url: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultView<'a> {
    Sections(Vec<Section<'a>>),
    Failed { message: &'a str },
}

/// Maps a result to its display sections. Never mutates the result.
pub fn present(result: &AnalysisResult) -> ResultView<'_> {
    match result {
        AnalysisResult::Success(assessment) => ResultView::Sections(sections(assessment)),
        AnalysisResult::Failure(failure) => ResultView::Failed {
            message: failure.message.as_str(),
        },
    }
}

pub fn sections(assessment: &ProduceAssessment) -> Vec<Section<'_>> {
    [
        assessment
            .identification()
            .map(|section| Section::Identification {
                name: &section.name,
                varieties: &section.varieties,
            }),
        assessment
            .quality_check()
            .map(|section| Section::QualityCheck {
                rate: &section.rate,
                reason: &section.reason,
            }),
        assessment.nutrition().map(|section| {
            Section::NutritionInfo(
                section
                    .rows()
                    .into_iter()
                    .filter(|(_, value)| !value.trim().is_empty())
                    .collect(),
            )
        }),
        assessment
            .storage()
            .map(|section| Section::StorageAdvice {
                method: &section.method,
                expiry_duration: &section.expiry_duration,
            }),
        assessment.fridge_reminder().map(Section::FridgeReminder),
        assessment.recipes().map(|recipes| {
            Section::RecipeSuggestions(
                recipes
                    .iter()
                    .map(|recipe| RecipeCard {
                        name: &recipe.name,
                        steps_preview: preview_steps(&recipe.steps),
                        video_url: Some(recipe.video_url.trim()).filter(|url| !url.is_empty()),
                    })
                    .collect(),
            )
        }),
        assessment.fun_fact().map(Section::FunFact),
        assessment
            .coating()
            .map(|section| Section::CoatingDetection {
                signs: &section.signs,
                confidence: &section.confidence,
            }),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn preview_steps(steps: &str) -> Cow<'_, str> {
    if steps.chars().count() <= RECIPE_STEPS_PREVIEW_CHARS {
        return Cow::Borrowed(steps);
    }
    let cut: String = steps.chars().take(RECIPE_STEPS_PREVIEW_CHARS).collect();
    Cow::Owned(cut + "...")
}

pub fn render_text(view: &ResultView<'_>) -> String {
    let mut out = String::new();
    match view {
        ResultView::Failed { message } => {
            let _ = writeln!(out, "Analysis failed: {message}");
        }
        ResultView::Sections(sections) => {
            for (idx, section) in sections.iter().enumerate() {
                if idx > 0 {
                    out.push('\n');
                }
                let _ = writeln!(out, "== {} ==", section.title());
                render_section(&mut out, section);
            }
        }
    }
    out
}

fn render_section(out: &mut String, section: &Section<'_>) {
    match section {
        Section::Identification { name, varieties } => {
            let _ = writeln!(out, "Name: {name}");
            if !varieties.trim().is_empty() {
                let _ = writeln!(out, "Varieties: {varieties}");
            }
        }
        Section::QualityCheck { rate, reason } => {
            let _ = writeln!(out, "Rating: {}", rate_label(rate));
            if !reason.trim().is_empty() {
                let _ = writeln!(out, "{reason}");
            }
        }
        Section::NutritionInfo(rows) => {
            for (label, value) in rows {
                let _ = writeln!(out, "{label}: {value}");
            }
        }
        Section::StorageAdvice {
            method,
            expiry_duration,
        } => {
            if !method.trim().is_empty() {
                let _ = writeln!(out, "{method}");
            }
            if !expiry_duration.trim().is_empty() {
                let _ = writeln!(out, "Keeps for: {expiry_duration}");
            }
        }
        Section::FridgeReminder(text) | Section::FunFact(text) => {
            let _ = writeln!(out, "{text}");
        }
        Section::RecipeSuggestions(cards) => {
            for card in cards {
                let _ = writeln!(out, "- {}", card.name);
                let _ = writeln!(out, "  {}", card.steps_preview);
                if let Some(url) = card.video_url {
                    let _ = writeln!(out, "  Video: {url}");
                }
            }
        }
        Section::CoatingDetection { signs, confidence } => {
            let _ = writeln!(out, "{signs}");
            if !confidence.trim().is_empty() {
                let _ = writeln!(out, "Confidence: {confidence}");
            }
        }
    }
}

pub fn rate_label(rate: &QualityRate) -> &str {
    match rate {
        QualityRate::Good => "Good (fresh)",
        QualityRate::Average => "Average (eat soon)",
        QualityRate::Bad => "Bad (past its best)",
        QualityRate::Unrated(raw) if raw.trim().is_empty() => "Unrated",
        QualityRate::Unrated(raw) => raw.as_str(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSummary {
    pub title: String,
    pub text: String,
}

pub fn share_summary(assessment: &ProduceAssessment) -> ShareSummary {
    let name = assessment.item_name();
    ShareSummary {
        title: format!("FreshCheck: {name}"),
        text: format!(
            "Check out my {name} analysis with FreshCheck! Quality: {}",
            assessment.rate()
        ),
    }
}

/// Platform share capability (clipboard, OS share sheet, ...).
pub trait ShareTarget {
    fn share(&self, summary: &ShareSummary) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared(ShareSummary),
    Unsupported { notice: &'static str },
    Failed(String),
}

pub fn share_result(target: Option<&dyn ShareTarget>, assessment: &ProduceAssessment) -> ShareOutcome {
    let Some(target) = target else {
        return ShareOutcome::Unsupported {
            notice: SHARE_UNSUPPORTED_NOTICE,
        };
    };
    let summary = share_summary(assessment);
    match target.share(&summary) {
        Ok(()) => ShareOutcome::Shared(summary),
        Err(err) => ShareOutcome::Failed(format!("{err:#}")),
    }
}
