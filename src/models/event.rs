use serde::Serialize;

use crate::models::StageResult;

/// Notification emitted while a stage runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    pub round_number: u32,
    pub stage_name: String,
    pub display_tag: String,
    /// Newest fragment, present only on chunk events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Accumulated text so far, the full output, or the error placeholder
    pub content: String,
    pub is_chunk: bool,
    pub is_error: bool,
}

impl StageEvent {
    pub fn chunk(round_number: u32, result: &StageResult, delta: &str) -> Self {
        Self {
            round_number,
            stage_name: result.stage_name.clone(),
            display_tag: result.display_tag.clone(),
            delta: Some(delta.to_string()),
            content: result.raw_output.clone(),
            is_chunk: true,
            is_error: false,
        }
    }

    pub fn completed(round_number: u32, result: &StageResult) -> Self {
        Self {
            round_number,
            stage_name: result.stage_name.clone(),
            display_tag: result.display_tag.clone(),
            delta: None,
            content: result.raw_output.clone(),
            is_chunk: false,
            is_error: result.failed,
        }
    }
}

/// Receives stage events; called synchronously from the executing stage
pub trait StageObserver: Send + Sync {
    fn on_stage_event(&self, event: &StageEvent);
}

impl<F> StageObserver for F
where
    F: Fn(&StageEvent) + Send + Sync,
{
    fn on_stage_event(&self, event: &StageEvent) {
        self(event)
    }
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn on_stage_event(&self, _event: &StageEvent) {}
}
