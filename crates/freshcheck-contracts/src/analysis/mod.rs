mod assessment;
mod result;

pub use assessment::{
    CoatingDetection, Identification, NutritionInfo, ProduceAssessment, QualityCheck,
    QualityRate, Recipe, StorageAdvice, ASSESSMENT_SECTION_KEYS,
};
pub use result::{
    AnalysisFailure, AnalysisResult, FailureKind, ANALYSIS_PARSE_MESSAGE,
    ANALYSIS_TRANSPORT_MESSAGE, ANALYSIS_UNEXPECTED_MESSAGE, UNSUPPORTED_SUBJECT_MESSAGE,
};
