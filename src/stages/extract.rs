/// Result of looking for a section marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    /// Whether the marker was present
    pub found: bool,
}

/// Pulls the section that follows a fixed heading out of generated text
#[derive(Debug, Clone)]
pub struct SectionExtractor {
    marker: String,
}

impl SectionExtractor {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Everything after the first occurrence of the marker, trimmed.
    ///
    /// Without a marker the input comes back unchanged and `found` is false.
    /// A marker at the very end yields an empty, found section.
    pub fn extract_section(&self, raw_output: &str) -> Extraction {
        match raw_output.split_once(self.marker.as_str()) {
            Some((_, after)) => Extraction {
                text: after.trim().to_string(),
                found: true,
            },
            None => Extraction {
                text: raw_output.to_string(),
                found: false,
            },
        }
    }

    pub fn extract(&self, raw_output: &str) -> String {
        self.extract_section(raw_output).text
    }
}

/// Body between `start` and the following `end` marker (or end of text), trimmed
pub fn section_between(text: &str, start: &str, end: &str) -> Option<String> {
    let (_, after) = text.split_once(start)?;
    let body = after.split_once(end).map_or(after, |(body, _)| body);
    Some(body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "# Revised Article";

    #[test]
    fn test_extract_after_first_marker() {
        let extractor = SectionExtractor::new(MARKER);
        let raw = "notes\n# Revised Article\n\n  New text\n# Revised Article\ntail ";
        let extraction = extractor.extract_section(raw);
        assert!(extraction.found);
        assert_eq!(extraction.text, "New text\n# Revised Article\ntail");
    }

    #[test]
    fn test_missing_marker_returns_input() {
        let extractor = SectionExtractor::new(MARKER);
        let raw = "  just notes  ";
        let extraction = extractor.extract_section(raw);
        assert!(!extraction.found);
        assert_eq!(extraction.text, raw);
    }

    #[test]
    fn test_marker_at_end_is_empty() {
        let extractor = SectionExtractor::new(MARKER);
        let extraction = extractor.extract_section("notes\n# Revised Article\n");
        assert!(extraction.found);
        assert_eq!(extraction.text, "");
    }

    #[test]
    fn test_extract_idempotent_without_marker() {
        let extractor = SectionExtractor::new(MARKER);
        for input in ["", "plain", " padded \n", "# Other heading\nbody"] {
            let once = extractor.extract(input);
            assert_eq!(extractor.extract(&once), once);
        }
    }

    #[test]
    fn test_section_between() {
        let text = "# A\n one \n# B\n two ";
        assert_eq!(section_between(text, "# A", "# B").as_deref(), Some("one"));
        assert_eq!(section_between(text, "# B", "# A").as_deref(), Some("two"));
        assert_eq!(section_between(text, "# C", "# B"), None);
    }
}
