use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{split_lineup, ExpertDefinition};

/// Current on-disk configuration version
pub const CONFIG_VERSION: u32 = 2;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

pub const REVISED_ARTICLE_MARKER: &str = "# Revised Article";
pub const COMBINED_SUGGESTIONS_MARKER: &str = "# Combined Suggestions";
pub const FINAL_RESULT_MARKER: &str = "# Final Polished Result";

/// Stock phrases the experts are told to avoid
pub const DEFAULT_MECHANICAL_WORDS: &[&str] = &[
    "in conclusion",
    "in summary",
    "therefore",
    "thus",
    "hence",
    "in other words",
    "admittedly",
    "obviously",
    "undoubtedly",
    "as everyone knows",
    "it goes without saying",
    "in fact",
    "actually",
    "objectively speaking",
    "subjectively speaking",
    "it can be said that",
    "at the end of the day",
    "all things considered",
    "to put it bluntly",
    "in short",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the article text is carried from one round into the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarryOverPolicy {
    /// Every round starts again from the original text; earlier rounds reach
    /// later ones only through the context transcript
    #[default]
    ResetEachRound,
    /// Round k>1 starts from the last extracted article of round k-1
    CarryForward,
}

/// Literal headings that delimit machine-extractable sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMarkers {
    pub revised_article: String,
    pub combined_suggestions: String,
    pub final_result: String,
}

impl Default for SectionMarkers {
    fn default() -> Self {
        Self {
            revised_article: REVISED_ARTICLE_MARKER.to_string(),
            combined_suggestions: COMBINED_SUGGESTIONS_MARKER.to_string(),
            final_result: FINAL_RESULT_MARKER.to_string(),
        }
    }
}

/// Completion endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Optional key; the DEEPSEEK_API_KEY environment variable wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Friendly name -> model id
    pub models: BTreeMap<String, String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            models: default_models(),
        }
    }
}

impl ApiSettings {
    /// Resolve a friendly model name ("DeepSeek-R1") or pass an id through
    pub fn resolve_model(&self, name: &str) -> String {
        self.models
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

fn default_models() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DeepSeek-V3".to_string(), "deepseek-chat".to_string()),
        ("DeepSeek-R1".to_string(), "deepseek-reasoner".to_string()),
    ])
}

/// Fully-populated application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub api: ApiSettings,
    /// Ordered lineup; the last expert is the synthesis expert
    pub experts: Vec<ExpertDefinition>,
    pub max_rounds: u32,
    pub mechanical_words: Vec<String>,
    pub markers: SectionMarkers,
    /// Deliver expert output incrementally
    pub streaming: bool,
    pub carry_over: CarryOverPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().migrate().0
    }
}

/// On-disk shape: every field optional, legacy names accepted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub version: Option<u32>,
    pub api: Option<RawApiSettings>,
    #[serde(alias = "agents")]
    pub experts: Option<Vec<ExpertDefinition>>,
    pub max_rounds: Option<u32>,
    pub mechanical_words: Option<Vec<String>>,
    pub markers: Option<RawSectionMarkers>,
    pub streaming: Option<bool>,
    pub carry_over: Option<CarryOverPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawApiSettings {
    #[serde(alias = "deepseek_key")]
    pub api_key: Option<String>,
    #[serde(alias = "deepseek_base_url")]
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub models: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSectionMarkers {
    pub revised_article: Option<String>,
    pub combined_suggestions: Option<String>,
    pub final_result: Option<String>,
}

/// Take `value` or the default, recording whether the default was used
fn fill<T>(value: Option<T>, default: impl FnOnce() -> T, filled: &mut bool) -> T {
    match value {
        Some(v) => v,
        None => {
            *filled = true;
            default()
        }
    }
}

impl RawConfig {
    /// Fill every missing field with its default.
    ///
    /// Returns the complete config and whether anything was filled in or the
    /// version was bumped, so the caller can decide to re-save.
    pub fn migrate(self) -> (AppConfig, bool) {
        let mut changed = self.version != Some(CONFIG_VERSION);

        let defaults = ApiSettings::default();
        let api = match self.api {
            Some(raw) => {
                // An empty key means "not set", as in the legacy files
                let api_key = raw.api_key.filter(|k| !k.is_empty());
                ApiSettings {
                    api_key,
                    base_url: fill(raw.base_url, || defaults.base_url.clone(), &mut changed),
                    model: fill(raw.model, || defaults.model.clone(), &mut changed),
                    models: fill(raw.models, default_models, &mut changed),
                }
            }
            None => {
                changed = true;
                defaults
            }
        };

        let markers = match self.markers {
            Some(raw) => {
                let defaults = SectionMarkers::default();
                SectionMarkers {
                    revised_article: fill(raw.revised_article, || defaults.revised_article, &mut changed),
                    combined_suggestions: fill(
                        raw.combined_suggestions,
                        || defaults.combined_suggestions,
                        &mut changed,
                    ),
                    final_result: fill(raw.final_result, || defaults.final_result, &mut changed),
                }
            }
            None => {
                changed = true;
                SectionMarkers::default()
            }
        };

        let config = AppConfig {
            version: CONFIG_VERSION,
            api,
            experts: fill(self.experts, ExpertDefinition::default_lineup, &mut changed),
            max_rounds: fill(self.max_rounds, || DEFAULT_MAX_ROUNDS, &mut changed),
            mechanical_words: fill(
                self.mechanical_words,
                || DEFAULT_MECHANICAL_WORDS.iter().map(|w| w.to_string()).collect(),
                &mut changed,
            ),
            markers,
            streaming: fill(self.streaming, || true, &mut changed),
            carry_over: fill(self.carry_over, CarryOverPolicy::default, &mut changed),
        };

        (config, changed)
    }
}

impl AppConfig {
    /// Parse a config document and fill in defaults
    pub fn from_json(json: &str) -> Result<(Self, bool), serde_json::Error> {
        let raw: RawConfig = serde_json::from_str(json)?;
        Ok(raw.migrate())
    }

    /// Load from `path`, returning defaults when the file does not exist.
    ///
    /// A file that needed migration is written back once it validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let (config, changed) = Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;

        if changed {
            info!("Config at {:?} was missing fields; writing migrated version", path);
            if let Err(e) = config.save(path) {
                warn!("Could not save migrated config: {}", e);
            }
        }

        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the stock-phrase list with one phrase per non-blank line.
    ///
    /// Surrounding whitespace is trimmed and repeated phrases are kept once.
    /// Returns the number of phrases now configured.
    pub fn set_mechanical_words_from_lines(&mut self, text: &str) -> usize {
        let mut words: Vec<String> = Vec::new();
        for word in text.lines().map(str::trim).filter(|w| !w.is_empty()) {
            if !words.iter().any(|w| w == word) {
                words.push(word.to_string());
            }
        }
        self.mechanical_words = words;
        self.mechanical_words.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if split_lineup(&self.experts).is_none() {
            return Err(ConfigError::Invalid(format!(
                "at least two experts are required (one revision expert and the synthesis expert), got {}",
                self.experts.len()
            )));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be at least 1".to_string()));
        }
        let markers = [
            &self.markers.revised_article,
            &self.markers.combined_suggestions,
            &self.markers.final_result,
        ];
        if markers.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid("section markers must not be empty".to_string()));
        }
        if self.markers.combined_suggestions == self.markers.final_result {
            return Err(ConfigError::Invalid(
                "combined_suggestions and final_result markers must differ".to_string(),
            ));
        }
        Ok(())
    }
}
