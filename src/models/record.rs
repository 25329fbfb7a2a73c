use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ExpertDefinition;

/// Output of one expert within a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Name of the expert that produced this result
    pub stage_name: String,
    /// Presentation hint copied from the expert definition
    pub display_tag: String,
    /// Full text produced by the stage (or an error placeholder)
    pub raw_output: String,
    /// Sub-section fed to the next stage as its article text
    pub extracted_article: String,
    /// Whether the completion call failed
    pub failed: bool,
}

impl StageResult {
    /// An empty result for a stage that is about to run
    pub fn in_flight(expert: &ExpertDefinition) -> Self {
        Self {
            stage_name: expert.name.clone(),
            display_tag: expert.display_tag.clone(),
            raw_output: String::new(),
            extracted_article: String::new(),
            failed: false,
        }
    }
}

/// Outcome of one round, appended to the session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round number
    pub round_number: u32,
    /// One entry per per-round expert, in configured order
    pub stage_results: Vec<StageResult>,
    /// Set when the round orchestration itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl RoundRecord {
    pub fn completed(round_number: u32, stage_results: Vec<StageResult>) -> Self {
        Self {
            round_number,
            stage_results,
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    pub fn errored(round_number: u32, stage_results: Vec<StageResult>, message: impl Into<String>) -> Self {
        Self {
            round_number,
            stage_results,
            error_message: Some(message.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// Number of stages whose completion call failed
    pub fn failed_stages(&self) -> usize {
        self.stage_results.iter().filter(|r| r.failed).count()
    }

    /// Extracted article text of the last stage in this round
    pub fn last_article(&self) -> Option<&str> {
        self.stage_results.last().map(|r| r.extracted_article.as_str())
    }
}

/// How the synthesis output had to be repaired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisShape {
    /// Both section markers were present
    WellFormed,
    /// Only the final-result marker was present; accepted as-is
    ResultOnly,
    /// Only the suggestions marker was present; original text used as result
    SuggestionsOnly,
    /// Neither marker was present; raw output wrapped as suggestions
    Unstructured,
}

impl SynthesisShape {
    pub fn was_repaired(&self) -> bool {
        matches!(self, SynthesisShape::SuggestionsOnly | SynthesisShape::Unstructured)
    }
}

/// Terminal output of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    /// Complete, well-formed two-section text
    pub text: String,
    /// Body of the combined-suggestions section
    pub combined_suggestions: String,
    /// Body of the final-result section
    pub final_result: String,
    pub shape: SynthesisShape,
    /// Set when the synthesis call itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
