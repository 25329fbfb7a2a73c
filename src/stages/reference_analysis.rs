use tracing::info;

use crate::llm::{style_analysis_prompt, CompletionError, CompletionProvider};
use crate::models::{ReferenceKind, ReferenceMaterial};

/// Summarize the style of combined reference text.
///
/// Returns `Ok(None)` when there is no reference content to analyze.
pub async fn analyze_reference(
    provider: &dyn CompletionProvider,
    kind: ReferenceKind,
    combined_text: &str,
) -> Result<Option<ReferenceMaterial>, CompletionError> {
    if combined_text.trim().is_empty() {
        return Ok(None);
    }

    info!(
        "Analyzing {} reference style ({} characters)",
        kind.as_str(),
        combined_text.chars().count()
    );

    let style_summary = provider
        .complete(style_analysis_prompt(kind), combined_text)
        .await?;

    Ok(Some(ReferenceMaterial::new(combined_text, style_summary, kind)))
}

/// Configured stock phrases that occur in `text`, in configured order.
///
/// Matching is case-insensitive.
pub fn find_mechanical_words(text: &str, words: &[String]) -> Vec<String> {
    let haystack = text.to_lowercase();
    words
        .iter()
        .filter(|w| !w.is_empty() && haystack.contains(&w.to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_analyze_reference() {
        let provider = ScriptedProvider::new(["Spare, lyrical prose"]);
        let reference = analyze_reference(&provider, ReferenceKind::Article, "\nFile: a.txt\nbody\n")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reference.kind, ReferenceKind::Article);
        assert_eq!(reference.style_summary, "Spare, lyrical prose");
        assert!(provider.prompts()[0].0.contains("literary style"));
    }

    #[tokio::test]
    async fn test_analyze_empty_reference() {
        let provider = ScriptedProvider::new(Vec::<String>::new());
        let reference = analyze_reference(&provider, ReferenceKind::Document, "  \n").await.unwrap();
        assert!(reference.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_analyze_propagates_failure() {
        let provider = ScriptedProvider::new(Vec::<String>::new()).fail_call(0, "down");
        let result = analyze_reference(&provider, ReferenceKind::Document, "text").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_find_mechanical_words() {
        let words = vec!["in fact".to_string(), "therefore".to_string(), "总之".to_string()];
        let found = find_mechanical_words("In fact, it rained. 总之，很好。", &words);
        assert_eq!(found, vec!["in fact".to_string(), "总之".to_string()]);
        assert!(find_mechanical_words("", &words).is_empty());
    }
}
