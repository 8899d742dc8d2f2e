use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::assessment::ProduceAssessment;

pub const ANALYSIS_TRANSPORT_MESSAGE: &str = "Failed to analyze image. Please try again.";
pub const ANALYSIS_PARSE_MESSAGE: &str = "Failed to parse analysis results. Please try again.";
pub const ANALYSIS_UNEXPECTED_MESSAGE: &str = "An unexpected error occurred. Please try again.";
pub const UNSUPPORTED_SUBJECT_MESSAGE: &str =
    "Unsupported image type. Please upload a clear image of a fruit or vegetable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request never completed or the endpoint answered with a non-2xx status.
    Transport,
    /// Reply text carried no decodable JSON object.
    Parse,
    /// The model declined the subject via an `error` object.
    UnsupportedSubject,
    /// A 2xx envelope that did not have the expected shape.
    Unexpected,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Parse => "parse",
            FailureKind::UnsupportedSubject => "unsupported_subject",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AnalysisFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl AnalysisFailure {
    pub fn transport() -> Self {
        Self {
            kind: FailureKind::Transport,
            message: ANALYSIS_TRANSPORT_MESSAGE.to_string(),
        }
    }

    pub fn parse() -> Self {
        Self {
            kind: FailureKind::Parse,
            message: ANALYSIS_PARSE_MESSAGE.to_string(),
        }
    }

    pub fn unexpected() -> Self {
        Self {
            kind: FailureKind::Unexpected,
            message: ANALYSIS_UNEXPECTED_MESSAGE.to_string(),
        }
    }

    pub fn unsupported_subject(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::UnsupportedSubject,
            message: message.into(),
        }
    }
}

/// Outcome of one inference round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    Success(Box<ProduceAssessment>),
    Failure(AnalysisFailure),
}

impl AnalysisResult {
    pub fn success(assessment: ProduceAssessment) -> Self {
        AnalysisResult::Success(Box::new(assessment))
    }

    pub fn assessment(&self) -> Option<&ProduceAssessment> {
        match self {
            AnalysisResult::Success(assessment) => Some(assessment),
            AnalysisResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&AnalysisFailure> {
        match self {
            AnalysisResult::Success(_) => None,
            AnalysisResult::Failure(failure) => Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisResult::Success(_))
    }
}

impl From<AnalysisFailure> for AnalysisResult {
    fn from(failure: AnalysisFailure) -> Self {
        AnalysisResult::Failure(failure)
    }
}
