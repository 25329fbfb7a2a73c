use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::SectionMarkers;
use crate::io::ArtifactStore;
use crate::llm::{build_expert_system_prompt, build_expert_user_prompt, CompletionProvider};
use crate::models::{ExpertDefinition, ReferenceMaterial, StageEvent, StageObserver, StageResult};
use crate::stages::SectionExtractor;

/// Placeholder stored as a failed stage's output
pub fn failure_placeholder(error: &str) -> String {
    format!("[Error during processing: {}]", error)
}

/// Runs one expert against the current article text
pub struct StageRunner<'a> {
    provider: &'a dyn CompletionProvider,
    observer: &'a dyn StageObserver,
    artifacts: &'a dyn ArtifactStore,
    markers: &'a SectionMarkers,
    mechanical_words: &'a [String],
    extractor: SectionExtractor,
    streaming: bool,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        provider: &'a dyn CompletionProvider,
        observer: &'a dyn StageObserver,
        artifacts: &'a dyn ArtifactStore,
        markers: &'a SectionMarkers,
        mechanical_words: &'a [String],
    ) -> Self {
        Self {
            provider,
            observer,
            artifacts,
            markers,
            mechanical_words,
            extractor: SectionExtractor::new(markers.revised_article.clone()),
            streaming: true,
        }
    }

    /// Toggle incremental delivery
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Execute `expert` on `current_text`.
    ///
    /// Never fails: a completion error produces a `failed` result whose raw
    /// output is a placeholder and whose extracted article is `current_text`
    /// unchanged, so the next stage continues from the last good text.
    pub async fn execute(
        &self,
        round_number: u32,
        expert: &ExpertDefinition,
        current_text: &str,
        reference: &ReferenceMaterial,
        context: &str,
    ) -> StageResult {
        let system = build_expert_system_prompt(expert, self.markers, self.mechanical_words);
        let user = build_expert_user_prompt(current_text, reference, context);

        info!("Round {}: running {}", round_number, expert.name);
        let start = Instant::now();

        let mut result = StageResult::in_flight(expert);

        let outcome = if self.streaming {
            let observer = self.observer;
            let in_flight = &mut result;
            let mut on_chunk = |delta: &str| {
                in_flight.raw_output.push_str(delta);
                observer.on_stage_event(&StageEvent::chunk(round_number, in_flight, delta));
            };
            self.provider.complete_stream(&system, &user, &mut on_chunk).await
        } else {
            self.provider.complete(&system, &user).await
        };

        match outcome {
            Ok(text) => {
                result.raw_output = text;

                let extraction = self.extractor.extract_section(&result.raw_output);
                if extraction.found {
                    debug!(
                        "Extracted revised article from {} ({} characters)",
                        expert.name,
                        extraction.text.chars().count()
                    );
                } else {
                    warn!(
                        "{} output has no '{}' section; passing full output forward",
                        expert.name,
                        self.extractor.marker()
                    );
                }
                result.extracted_article = extraction.text;

                if let Err(e) = self
                    .artifacts
                    .write_stage(round_number, &expert.name, &result.raw_output)
                {
                    warn!("Could not persist {} output: {:#}", expert.name, e);
                }
            }
            Err(e) => {
                warn!("Round {}: {} failed: {}", round_number, expert.name, e);
                result.failed = true;
                result.raw_output = failure_placeholder(&e.to_string());
                result.extracted_article = current_text.to_string();
            }
        }

        self.observer
            .on_stage_event(&StageEvent::completed(round_number, &result));

        info!(
            "Round {}: {} finished in {:.2}s, {} characters",
            round_number,
            expert.name,
            start.elapsed().as_secs_f64(),
            result.raw_output.chars().count()
        );

        result
    }
}
