use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

pub const FINAL_ARTIFACT_NAME: &str = "final_result.md";

/// Persists stage outputs and the final artifact
pub trait ArtifactStore: Send + Sync {
    /// Remove every artifact from a previous run
    fn clear(&self) -> Result<()>;

    /// Persist one stage's output; fails if the key was already written
    fn write_stage(&self, round_number: u32, stage_name: &str, content: &str) -> Result<()>;

    /// Persist (or replace) the final artifact
    fn write_final(&self, content: &str) -> Result<()>;
}

/// Replace characters that are unsafe in file names
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim().is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

pub fn stage_artifact_name(round_number: u32, stage_name: &str) -> String {
    format!("round_{}_{}.md", round_number, sanitize_filename(stage_name))
}

fn stage_document(stage_name: &str, content: &str) -> String {
    format!("# {} revision notes\n\n{}", stage_name, content)
}

/// Artifact store backed by a directory of markdown files
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create artifact directory: {:?}", self.dir))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            info!("Creating artifact directory {:?}", self.dir);
            return self.ensure_dir();
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list artifact directory: {:?}", self.dir))?
        {
            let path = entry?.path();
            if path.is_file() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove artifact: {:?}", path))?;
                debug!("Removed {:?}", path);
                removed += 1;
            }
        }

        info!("Cleared {} artifacts from {:?}", removed, self.dir);
        Ok(())
    }

    fn write_stage(&self, round_number: u32, stage_name: &str, content: &str) -> Result<()> {
        self.ensure_dir()?;
        let path = self.dir.join(stage_artifact_name(round_number, stage_name));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create artifact: {:?}", path))?;
        file.write_all(stage_document(stage_name, content).as_bytes())
            .with_context(|| format!("Failed to write artifact: {:?}", path))?;

        debug!("Saved {} output to {:?}", stage_name, path);
        Ok(())
    }

    fn write_final(&self, content: &str) -> Result<()> {
        self.ensure_dir()?;
        let path = self.dir.join(FINAL_ARTIFACT_NAME);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write final artifact: {:?}", path))?;
        info!("Saved final result to {:?}", path);
        Ok(())
    }
}

/// Artifact store that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.artifacts.lock().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn clear(&self) -> Result<()> {
        match self.artifacts.lock() {
            Ok(mut artifacts) => {
                artifacts.clear();
                Ok(())
            }
            Err(_) => bail!("artifact store lock poisoned"),
        }
    }

    fn write_stage(&self, round_number: u32, stage_name: &str, content: &str) -> Result<()> {
        let name = stage_artifact_name(round_number, stage_name);
        let Ok(mut artifacts) = self.artifacts.lock() else {
            bail!("artifact store lock poisoned");
        };
        if artifacts.contains_key(&name) {
            bail!("Artifact {} already written", name);
        }
        artifacts.insert(name, stage_document(stage_name, content));
        Ok(())
    }

    fn write_final(&self, content: &str) -> Result<()> {
        let Ok(mut artifacts) = self.artifacts.lock() else {
            bail!("artifact store lock poisoned");
        };
        artifacts.insert(FINAL_ARTIFACT_NAME.to_string(), content.to_string());
        Ok(())
    }
}
