use serde::{Deserialize, Serialize};

/// Style hint used when no reference material was supplied
pub const SELF_REFERENCE_HINT: &str =
    "No reference material was provided; polish based on the original article.";

/// Where the reference material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Reference documents (theory, guidelines)
    Document,
    /// Reference articles whose literary style should be followed
    Article,
    /// No reference; the original text stands in for itself
    #[serde(rename = "self")]
    SelfText,
    /// A user-supplied style summary without reference files
    Custom,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Document => "document",
            ReferenceKind::Article => "article",
            ReferenceKind::SelfText => "self",
            ReferenceKind::Custom => "custom",
        }
    }
}

/// Grounding material supplied to every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMaterial {
    /// Raw reference content
    pub content: String,
    /// Short summary of the reference style
    pub style_summary: String,
    /// Origin of the material
    pub kind: ReferenceKind,
}

impl ReferenceMaterial {
    pub fn new(content: impl Into<String>, style_summary: impl Into<String>, kind: ReferenceKind) -> Self {
        Self {
            content: content.into(),
            style_summary: style_summary.into(),
            kind,
        }
    }

    /// Use the original text as its own reference
    pub fn from_original(original_text: &str) -> Self {
        Self::new(original_text, SELF_REFERENCE_HINT, ReferenceKind::SelfText)
    }

    /// Pick the reference for a run.
    ///
    /// Articles take precedence over documents; with neither, the original
    /// text is used. A non-blank `style_override` replaces the selected
    /// summary, and turns a self-reference into a custom one.
    pub fn select(
        article: Option<ReferenceMaterial>,
        document: Option<ReferenceMaterial>,
        original_text: &str,
        style_override: Option<&str>,
    ) -> Self {
        let mut selected = article
            .or(document)
            .unwrap_or_else(|| Self::from_original(original_text));

        if let Some(style) = style_override.map(str::trim).filter(|s| !s.is_empty()) {
            selected.style_summary = style.to_string();
            if selected.kind == ReferenceKind::SelfText {
                selected.kind = ReferenceKind::Custom;
            }
        }

        selected
    }
}
