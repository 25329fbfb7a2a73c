use serde::{Deserialize, Serialize};

/// A configured rewriting role in the revision pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertDefinition {
    /// Display and attribution name (e.g., "Literary Expert")
    pub name: String,
    /// Free-text description of the expert's specialization
    #[serde(alias = "description")]
    pub prompt_role: String,
    /// Presentation hint for observers, opaque to the pipeline
    #[serde(alias = "color")]
    pub display_tag: String,
}

impl ExpertDefinition {
    pub fn new(
        name: impl Into<String>,
        prompt_role: impl Into<String>,
        display_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prompt_role: prompt_role.into(),
            display_tag: display_tag.into(),
        }
    }

    /// The built-in expert lineup; the last entry is the synthesis expert
    pub fn default_lineup() -> Vec<Self> {
        vec![
            Self::new(
                "Literary Expert",
                "Focuses on literary quality, rhetoric and tone; raises the artistic value of the piece.",
                "blue",
            ),
            Self::new(
                "Language Optimizer",
                "Focuses on grammar, word choice and sentence construction; improves precision and variety of expression.",
                "green",
            ),
            Self::new(
                "Structure Analyst",
                "Focuses on overall structure, paragraph organization and logical coherence; improves the flow of argument.",
                "orange",
            ),
            Self::new(
                "Style Shaper",
                "Focuses on register, voice and emotional expression; shapes the piece toward a distinct style.",
                "purple",
            ),
            Self::new(
                "Chief Reviewer",
                "Integrates the suggestions of every expert and makes the final call, balancing their views into one result.",
                "red",
            ),
        ]
    }
}

/// Split a lineup into the per-round experts and the synthesis expert.
///
/// Returns `None` when the lineup has no per-round expert.
pub fn split_lineup(experts: &[ExpertDefinition]) -> Option<(&[ExpertDefinition], &ExpertDefinition)> {
    match experts.split_last() {
        Some((synthesis, revision)) if !revision.is_empty() => Some((revision, synthesis)),
        _ => None,
    }
}
