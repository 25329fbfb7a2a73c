use crate::config::SectionMarkers;
use crate::models::{ExpertDefinition, ReferenceKind, ReferenceMaterial};

/// Style-analysis instruction for reference documents
pub const DOCUMENT_ANALYSIS_PROMPT: &str = r#"Analyze the content and style of the following reference documents and extract:

1. The main content and themes
2. The register (formal or informal, academic or popular)
3. Characteristic vocabulary and expressions
4. How arguments are made and structured
5. The line of reasoning and way of thinking

Pay attention to the theoretical, academic and instructive qualities of the documents; they will guide the revision of an article.
Give a concise, clear summary to be used as a revision reference. Do not use markdown."#;

/// Style-analysis instruction for reference articles
pub const ARTICLE_ANALYSIS_PROMPT: &str = r#"Analyze the literary style and artistic qualities of the following reference articles and extract:

1. Genre and mode (lyrical, narrative, argumentative, impressionistic)
2. Language character (spare, ornate, understated, direct)
3. Rhetorical devices and techniques
4. Emotional tone and atmosphere
5. Structure and rhythm
6. Distinctive word choice and sentence patterns

Focus on literary quality, artistry and how distinctive the style is; the summary will steer the stylistic revision of an article.
Give a concise, clear summary of the style. Do not use markdown."#;

pub fn style_analysis_prompt(kind: ReferenceKind) -> &'static str {
    match kind {
        ReferenceKind::Document => DOCUMENT_ANALYSIS_PROMPT,
        _ => ARTICLE_ANALYSIS_PROMPT,
    }
}

fn push_avoid_list(prompt: &mut String, mechanical_words: &[String]) {
    if mechanical_words.is_empty() {
        return;
    }
    prompt.push_str("\nAvoid these stock phrases; rephrase naturally wherever they occur:\n");
    prompt.push_str(&mechanical_words.join(", "));
    prompt.push('\n');
}

/// System prompt for a per-round revision expert
pub fn build_expert_system_prompt(
    expert: &ExpertDefinition,
    markers: &SectionMarkers,
    mechanical_words: &[String],
) -> String {
    let mut prompt = format!(
        "You are {}, a member of a panel of writing experts revising one article together.\n\
         Your specialization: {}\n\n",
        expert.name, expert.prompt_role
    );

    prompt.push_str("Review the article from the angle of your specialization, taking into account the reference material and what the other experts have said so far.\n");
    prompt.push_str("Preserve the author's meaning and facts. Do not invent new content.\n");
    push_avoid_list(&mut prompt, mechanical_words);

    prompt.push_str("\nRespond in exactly two parts:\n");
    prompt.push_str(&format!("# {} revision notes\n", expert.name));
    prompt.push_str("Your specific suggestions and the reasons for them.\n\n");
    prompt.push_str(&format!("{}\n", markers.revised_article));
    prompt.push_str("The complete article with your revisions applied, and nothing else after it.\n");

    prompt
}

/// User prompt for a per-round revision expert
pub fn build_expert_user_prompt(text: &str, reference: &ReferenceMaterial, context: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Article\n");
    prompt.push_str(text);
    prompt.push_str("\n\n");

    prompt.push_str(&format!("## Reference ({})\n", reference.kind.as_str()));
    prompt.push_str("Style summary: ");
    prompt.push_str(&reference.style_summary);
    prompt.push('\n');
    if reference.kind != ReferenceKind::SelfText && !reference.content.is_empty() {
        prompt.push_str("Reference content:\n");
        prompt.push_str(&reference.content);
        prompt.push('\n');
    }
    prompt.push('\n');

    prompt.push_str("## Discussion so far\n");
    if context.trim().is_empty() {
        prompt.push_str("(You are the first to speak.)\n");
    } else {
        prompt.push_str(context.trim_start_matches('\n'));
        prompt.push('\n');
    }

    prompt
}

/// System prompt for the synthesis expert
pub fn build_synthesis_system_prompt(
    expert: &ExpertDefinition,
    markers: &SectionMarkers,
    mechanical_words: &[String],
) -> String {
    let mut prompt = format!(
        "You are {}. {}\n\n\
         Several experts have discussed an article over multiple rounds. Merge their suggestions, \
         resolve any disagreements, and produce the final version of the article.\n\
         Preserve the author's meaning and facts. Do not invent new content.\n",
        expert.name, expert.prompt_role
    );
    push_avoid_list(&mut prompt, mechanical_words);

    prompt.push_str("\nRespond in exactly two parts, using these headings verbatim:\n");
    prompt.push_str(&format!("{}\n", markers.combined_suggestions));
    prompt.push_str("A consolidated list of the changes you adopted and why.\n\n");
    prompt.push_str(&format!("{}\n", markers.final_result));
    prompt.push_str("The complete final article, and nothing else after it.\n");

    prompt
}

/// User prompt for the synthesis expert
pub fn build_synthesis_user_prompt(original_text: &str, suggestions: &str, style_hint: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Original article\n");
    prompt.push_str(original_text);
    prompt.push_str("\n\n");

    prompt.push_str("## Expert suggestions\n");
    prompt.push_str(suggestions.trim_start_matches('\n'));
    prompt.push_str("\n\n");

    if !style_hint.trim().is_empty() {
        prompt.push_str("## Style reference\n");
        prompt.push_str(style_hint);
        prompt.push('\n');
    }

    prompt
}
