use std::time::Instant;

use tracing::{info, warn};

use crate::config::SectionMarkers;
use crate::io::ArtifactStore;
use crate::llm::{build_synthesis_system_prompt, build_synthesis_user_prompt, CompletionProvider};
use crate::models::{ExpertDefinition, FinalArtifact, RoundRecord, SynthesisShape};
use crate::stages::{failure_placeholder, section_between};

/// Flatten every round's stage outputs into one suggestions transcript
pub fn flatten_suggestions(history: &[RoundRecord]) -> String {
    let mut suggestions = String::new();
    for round in history {
        suggestions.push_str(&format!("\nRound {}:\n", round.round_number));
        for result in &round.stage_results {
            suggestions.push_str(&format!("{}: {}\n", result.stage_name, result.raw_output));
        }
    }
    suggestions
}

/// Turn raw synthesis output into a well-formed two-section artifact.
///
/// - both markers: used as-is
/// - final-result marker only: used as-is
/// - suggestions marker only: suggestions kept, original text as the result
/// - neither: raw output becomes the suggestions, original text the result
pub fn repair_synthesis(raw_output: &str, original_text: &str, markers: &SectionMarkers) -> FinalArtifact {
    let suggestions_marker = markers.combined_suggestions.as_str();
    let result_marker = markers.final_result.as_str();

    let has_suggestions = raw_output.contains(suggestions_marker);
    let has_result = raw_output.contains(result_marker);

    let (text, shape) = match (has_suggestions, has_result) {
        (true, true) => (raw_output.to_string(), SynthesisShape::WellFormed),
        (false, true) => (raw_output.to_string(), SynthesisShape::ResultOnly),
        (true, false) => {
            let suggestions = raw_output
                .split_once(suggestions_marker)
                .map(|(_, after)| after.trim())
                .unwrap_or_default();
            (
                two_sections(markers, suggestions, original_text),
                SynthesisShape::SuggestionsOnly,
            )
        }
        (false, false) => (
            two_sections(markers, raw_output.trim(), original_text),
            SynthesisShape::Unstructured,
        ),
    };

    let combined_suggestions = section_between(&text, suggestions_marker, result_marker).unwrap_or_default();
    let final_result = text
        .split_once(result_marker)
        .map(|(_, after)| after.trim().to_string())
        .unwrap_or_default();

    FinalArtifact {
        text,
        combined_suggestions,
        final_result,
        shape,
        error_message: None,
    }
}

fn two_sections(markers: &SectionMarkers, suggestions: &str, result: &str) -> String {
    format!(
        "{}\n\n{}\n\n{}\n\n{}",
        markers.combined_suggestions, suggestions, markers.final_result, result
    )
}

/// Produces the final artifact from the whole session history
pub struct FinalSynthesizer<'a> {
    provider: &'a dyn CompletionProvider,
    artifacts: &'a dyn ArtifactStore,
    markers: &'a SectionMarkers,
    mechanical_words: &'a [String],
}

impl<'a> FinalSynthesizer<'a> {
    pub fn new(
        provider: &'a dyn CompletionProvider,
        artifacts: &'a dyn ArtifactStore,
        markers: &'a SectionMarkers,
        mechanical_words: &'a [String],
    ) -> Self {
        Self {
            provider,
            artifacts,
            markers,
            mechanical_words,
        }
    }

    /// Invoke the synthesis expert once over the flattened history.
    ///
    /// A failed completion call is contained: the artifact falls back to the
    /// original text and carries the error message.
    pub async fn synthesize(
        &self,
        expert: &ExpertDefinition,
        original_text: &str,
        history: &[RoundRecord],
        style_hint: &str,
    ) -> FinalArtifact {
        let suggestions = flatten_suggestions(history);
        info!(
            "Synthesizing final result from {} rounds with {}",
            history.len(),
            expert.name
        );

        let system = build_synthesis_system_prompt(expert, self.markers, self.mechanical_words);
        let user = build_synthesis_user_prompt(original_text, &suggestions, style_hint);

        let start = Instant::now();
        let (raw_output, error_message) = match self.provider.complete(&system, &user).await {
            Ok(text) => (text, None),
            Err(e) => {
                warn!("Synthesis by {} failed: {}", expert.name, e);
                let message = e.to_string();
                (failure_placeholder(&message), Some(message))
            }
        };

        let mut artifact = repair_synthesis(&raw_output, original_text, self.markers);
        artifact.error_message = error_message;

        if artifact.shape.was_repaired() {
            warn!(
                "Synthesis output was malformed ({:?}); repaired with the original text as the result",
                artifact.shape
            );
        }

        info!(
            "Final result ready in {:.2}s, {} characters",
            start.elapsed().as_secs_f64(),
            artifact.final_result.chars().count()
        );

        if let Err(e) = self.artifacts.write_final(&artifact.text) {
            warn!("Could not persist final result: {:#}", e);
        }

        artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryArtifactStore, FINAL_ARTIFACT_NAME};
    use crate::models::StageResult;
    use crate::testing::ScriptedProvider;

    fn markers() -> SectionMarkers {
        SectionMarkers::default()
    }

    fn history() -> Vec<RoundRecord> {
        let stage = |name: &str, output: &str| StageResult {
            stage_name: name.to_string(),
            display_tag: "blue".to_string(),
            raw_output: output.to_string(),
            extracted_article: output.to_string(),
            failed: false,
        };
        vec![
            RoundRecord::completed(1, vec![stage("A", "a1"), stage("B", "b1")]),
            RoundRecord::completed(2, vec![stage("A", "a2"), stage("B", "b2")]),
        ]
    }

    #[test]
    fn test_flatten_suggestions() {
        assert_eq!(
            flatten_suggestions(&history()),
            "\nRound 1:\nA: a1\nB: b1\n\nRound 2:\nA: a2\nB: b2\n"
        );
        assert_eq!(flatten_suggestions(&[]), "");
    }

    #[test]
    fn test_well_formed_used_as_is() {
        let raw = "# Combined Suggestions\nmerge\n# Final Polished Result\nFinal text";
        let artifact = repair_synthesis(raw, "T", &markers());
        assert_eq!(artifact.shape, SynthesisShape::WellFormed);
        assert_eq!(artifact.text, raw);
        assert_eq!(artifact.combined_suggestions, "merge");
        assert_eq!(artifact.final_result, "Final text");
    }

    #[test]
    fn test_unstructured_wraps_raw_and_keeps_original() {
        let artifact = repair_synthesis("  free-form notes ", "T", &markers());
        assert_eq!(artifact.shape, SynthesisShape::Unstructured);
        assert_eq!(artifact.combined_suggestions, "free-form notes");
        assert_eq!(artifact.final_result, "T");
        assert_eq!(
            artifact.text,
            "# Combined Suggestions\n\nfree-form notes\n\n# Final Polished Result\n\nT"
        );
    }

    #[test]
    fn test_suggestions_only_uses_original_result() {
        let raw = "preamble\n# Combined Suggestions\n tighten intro \n";
        let artifact = repair_synthesis(raw, "T", &markers());
        assert_eq!(artifact.shape, SynthesisShape::SuggestionsOnly);
        assert_eq!(artifact.combined_suggestions, "tighten intro");
        assert_eq!(artifact.final_result, "T");
        assert!(!artifact.text.contains("preamble"));
    }

    #[test]
    fn test_result_only_accepted() {
        let raw = "# Final Polished Result\nPolished";
        let artifact = repair_synthesis(raw, "T", &markers());
        assert_eq!(artifact.shape, SynthesisShape::ResultOnly);
        assert_eq!(artifact.text, raw);
        assert_eq!(artifact.final_result, "Polished");
        assert_eq!(artifact.combined_suggestions, "");
        assert!(!artifact.shape.was_repaired());
    }

    #[tokio::test]
    async fn test_synthesize_invokes_expert_once() {
        let provider = ScriptedProvider::new(["# Combined Suggestions\nok\n# Final Polished Result\nDone"]);
        let artifacts = MemoryArtifactStore::new();
        let markers = markers();
        let synthesizer = FinalSynthesizer::new(&provider, &artifacts, &markers, &[]);
        let expert = ExpertDefinition::new("Reviewer", "merge", "red");

        let artifact = synthesizer.synthesize(&expert, "T", &history(), "lyrical").await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(artifact.final_result, "Done");
        assert!(artifact.error_message.is_none());
        assert_eq!(artifacts.get(FINAL_ARTIFACT_NAME), Some(artifact.text.clone()));

        let (system, user) = &provider.prompts()[0];
        assert!(system.contains("Reviewer"));
        assert!(user.contains("Round 2:\nA: a2"));
        assert!(user.contains("lyrical"));
    }

    #[tokio::test]
    async fn test_synthesize_contains_failure() {
        let provider = ScriptedProvider::new(Vec::<String>::new()).fail_call(0, "unauthorized");
        let artifacts = MemoryArtifactStore::new();
        let markers = markers();
        let synthesizer = FinalSynthesizer::new(&provider, &artifacts, &markers, &[]);
        let expert = ExpertDefinition::new("Reviewer", "merge", "red");

        let artifact = synthesizer.synthesize(&expert, "T", &history(), "").await;

        assert_eq!(artifact.error_message.as_deref(), Some("unauthorized"));
        assert_eq!(artifact.shape, SynthesisShape::Unstructured);
        assert_eq!(artifact.final_result, "T");
        assert!(artifact.combined_suggestions.contains("unauthorized"));
    }
}
