use std::path::Path;

use anyhow::{Context, Result};

/// Read an article from a UTF-8 text file
pub fn read_article(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))
}

/// Join reference files into one labelled block.
///
/// Missing files are skipped. Returns an empty string when nothing was read.
pub fn combine_reference_files(paths: &[impl AsRef<Path>]) -> Result<String> {
    let mut combined = String::new();

    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Reference file {:?} does not exist, skipping", path);
            continue;
        }

        let content = read_article(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        combined.push_str(&format!("\nFile: {}\n{}\n", name, content));
    }

    Ok(combined)
}

/// Count characters ignoring whitespace
pub fn count_characters(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_reference_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "alpha").unwrap();
        let missing = dir.path().join("missing.txt");

        let combined = combine_reference_files(&[a, missing]).unwrap();
        assert_eq!(combined, "\nFile: a.txt\nalpha\n");
    }

    #[test]
    fn test_combine_no_files() {
        let paths: Vec<std::path::PathBuf> = vec![];
        assert!(combine_reference_files(&paths).unwrap().is_empty());
    }

    #[test]
    fn test_count_characters() {
        assert_eq!(count_characters("a b\nc"), 3);
        assert_eq!(count_characters("春 眠"), 2);
        assert_eq!(count_characters("   "), 0);
    }
}
