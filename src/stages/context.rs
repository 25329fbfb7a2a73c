use crate::models::RoundRecord;

/// Append one stage's output to a transcript, returning the new transcript.
///
/// Format: `transcript + "\n" + stage_name + ": " + content`.
pub fn append_context(transcript: &str, stage_name: &str, content: &str) -> String {
    let mut next = String::with_capacity(transcript.len() + stage_name.len() + content.len() + 3);
    next.push_str(transcript);
    next.push('\n');
    next.push_str(stage_name);
    next.push_str(": ");
    next.push_str(content);
    next
}

/// Rebuild the transcript an incremental accumulation over `history` produces
pub fn render_history(history: &[RoundRecord]) -> String {
    history
        .iter()
        .flat_map(|round| round.stage_results.iter())
        .fold(String::new(), |transcript, result| {
            append_context(&transcript, &result.stage_name, &result.raw_output)
        })
}
