pub mod config;
pub mod io;
pub mod llm;
pub mod models;
pub mod session;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AppConfig, CarryOverPolicy, ConfigError, SectionMarkers};
pub use io::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use llm::{ChatClient, ChatConfig, CompletionError, CompletionProvider};
pub use models::{
    ExpertDefinition, FinalArtifact, ReferenceKind, ReferenceMaterial, RoundRecord, StageEvent,
    StageObserver, StageResult,
};
pub use session::{AdvanceOutcome, DeclineReason, SessionMachine, SessionPhase, SessionSnapshot};
pub use stages::{
    append_context, find_mechanical_words, render_history, FinalSynthesizer, RoundPipeline,
    SectionExtractor, StageRunner,
};
