//! Session state machine.
//!
//! `SessionMachine` owns the single `Session`, moves it through
//! `Idle -> Running -> (RoundComplete | RoundError)* -> Finalized`, and
//! publishes a `SessionSnapshot` on a watch channel after every transition.
//! Entry is guarded by a non-blocking lock: a call that arrives while
//! another is in flight is declined as `Busy`, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ConfigError};
use crate::io::ArtifactStore;
use crate::llm::CompletionProvider;
use crate::models::{
    split_lineup, ExpertDefinition, FinalArtifact, NoopObserver, ReferenceMaterial, RoundRecord,
    StageObserver,
};
use crate::stages::{FinalSynthesizer, RoundPipeline, StageRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Running,
    RoundComplete,
    RoundError,
    Finalized,
}

/// State of one revision run
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    /// Article being revised; fixed for the lifetime of the run
    pub original_text: String,
    pub reference: ReferenceMaterial,
    pub max_rounds: u32,
    /// Rounds run so far; always equal to `history.len()`
    pub current_round: u32,
    pub history: Vec<RoundRecord>,
    /// Set by the first finalization
    pub final_artifact: Option<FinalArtifact>,
    pub phase: SessionPhase,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(original_text: impl Into<String>, reference: ReferenceMaterial, max_rounds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_text: original_text.into(),
            reference,
            max_rounds,
            current_round: 0,
            history: Vec::new(),
            final_artifact: None,
            phase: SessionPhase::Idle,
            started_at: Utc::now(),
        }
    }

    fn idle(max_rounds: u32) -> Self {
        Self::new(String::new(), ReferenceMaterial::from_original(""), max_rounds)
    }

    pub fn progress_percent(&self) -> u8 {
        if self.max_rounds == 0 {
            return 0;
        }
        (u64::from(self.current_round) * 100 / u64::from(self.max_rounds)).min(100) as u8
    }
}

/// Read-only view published after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub current_round: u32,
    pub max_rounds: u32,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    fn of(session: &Session, last_error: Option<String>) -> Self {
        Self {
            session_id: session.id,
            phase: session.phase,
            current_round: session.current_round,
            max_rounds: session.max_rounds,
            progress_percent: session.progress_percent(),
            last_error,
        }
    }
}

/// Why a call was declined without touching the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    /// Another start/advance is in flight
    Busy,
    /// `advance()` before any `start()`
    NotStarted,
    /// `max_rounds` of zero
    InvalidMaxRounds,
    /// A stop was requested; call `start()` to run again
    Stopped,
}

impl std::fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            DeclineReason::Busy => "another operation is in progress, try again later",
            DeclineReason::NotStarted => "no session has been started",
            DeclineReason::InvalidMaxRounds => "max_rounds must be at least 1",
            DeclineReason::Stopped => "the session was stopped",
        };
        f.write_str(message)
    }
}

/// Result of `start()` / `advance()`
#[derive(Debug, Clone)]
pub enum AdvanceOutcome {
    /// A round ran (possibly with failed stages or an error message)
    Round(RoundRecord),
    /// The session is finalized
    Final {
        artifact: FinalArtifact,
        history: Vec<RoundRecord>,
    },
    Declined(DeclineReason),
}

impl AdvanceOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdvanceOutcome::Final { .. })
    }
}

/// Drives a session through rounds and final synthesis
pub struct SessionMachine {
    config: AppConfig,
    synthesis_expert: ExpertDefinition,
    provider: Arc<dyn CompletionProvider>,
    artifacts: Arc<dyn ArtifactStore>,
    observer: Arc<dyn StageObserver>,
    session: Mutex<Session>,
    stop_requested: AtomicBool,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionMachine {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn CompletionProvider>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let synthesis_expert = split_lineup(&config.experts)
            .map(|(_, synthesis)| synthesis.clone())
            .ok_or_else(|| ConfigError::Invalid("no synthesis expert configured".to_string()))?;

        let session = Session::idle(config.max_rounds);
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::of(&session, None));

        Ok(Self {
            config,
            synthesis_expert,
            provider,
            artifacts,
            observer: Arc::new(NoopObserver),
            session: Mutex::new(session),
            stop_requested: AtomicBool::new(false),
            snapshot_tx,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Begin a new run and execute its first round.
    ///
    /// Resets history and round counter, clears previous artifacts, and keeps
    /// the previous `max_rounds` when none is given.
    pub async fn start(
        &self,
        original_text: &str,
        reference: ReferenceMaterial,
        max_rounds: Option<u32>,
    ) -> AdvanceOutcome {
        let Ok(mut session) = self.session.try_lock() else {
            info!("start() declined: session busy");
            return AdvanceOutcome::Declined(DeclineReason::Busy);
        };

        if max_rounds == Some(0) {
            return AdvanceOutcome::Declined(DeclineReason::InvalidMaxRounds);
        }
        let max_rounds = max_rounds.unwrap_or(session.max_rounds);

        *session = Session::new(original_text, reference, max_rounds);
        session.phase = SessionPhase::Running;
        self.stop_requested.store(false, Ordering::SeqCst);

        if let Err(e) = self.artifacts.clear() {
            warn!("Could not clear previous artifacts: {:#}", e);
        }

        info!(
            "Session {} started: {} characters, {} reference, {} rounds",
            session.id,
            session.original_text.chars().count(),
            session.reference.kind.as_str(),
            session.max_rounds
        );
        self.publish(&session, None);

        self.advance_locked(&mut session).await
    }

    /// Run the next round, or finalize once `max_rounds` rounds have run.
    ///
    /// Calling again after finalization re-runs the synthesis and returns
    /// another terminal outcome.
    pub async fn advance(&self) -> AdvanceOutcome {
        let Ok(mut session) = self.session.try_lock() else {
            info!("advance() declined: session busy");
            return AdvanceOutcome::Declined(DeclineReason::Busy);
        };

        if session.phase == SessionPhase::Idle {
            return AdvanceOutcome::Declined(DeclineReason::NotStarted);
        }
        if self.stop_requested.load(Ordering::SeqCst) {
            return AdvanceOutcome::Declined(DeclineReason::Stopped);
        }

        self.advance_locked(&mut session).await
    }

    /// Run `advance()` on a background task
    pub fn spawn_advance(self: &Arc<Self>) -> JoinHandle<AdvanceOutcome> {
        let machine = Arc::clone(self);
        tokio::spawn(async move { machine.advance().await })
    }

    /// Start a run and advance until it finalizes or is declined
    pub async fn run_to_completion(
        &self,
        original_text: &str,
        reference: ReferenceMaterial,
        max_rounds: Option<u32>,
    ) -> AdvanceOutcome {
        let mut outcome = self.start(original_text, reference, max_rounds).await;
        while let AdvanceOutcome::Round(_) = outcome {
            outcome = self.advance().await;
        }
        outcome
    }

    /// Keep further rounds from being scheduled; an in-flight call finishes
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Drop the current session, keeping `max_rounds`
    pub fn reset(&self) -> Result<(), DeclineReason> {
        let Ok(mut session) = self.session.try_lock() else {
            return Err(DeclineReason::Busy);
        };
        *session = Session::idle(session.max_rounds);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.publish(&session, None);
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Copy of the session, unless a call is in flight
    pub fn session(&self) -> Option<Session> {
        self.session.try_lock().ok().map(|s| s.clone())
    }

    async fn advance_locked(&self, session: &mut Session) -> AdvanceOutcome {
        if session.current_round >= session.max_rounds {
            return self.finalize(session).await;
        }

        let runner = StageRunner::new(
            self.provider.as_ref(),
            self.observer.as_ref(),
            self.artifacts.as_ref(),
            &self.config.markers,
            &self.config.mechanical_words,
        )
        .with_streaming(self.config.streaming);
        let pipeline = RoundPipeline::new(&runner, &self.config.experts, self.config.carry_over);

        let record = pipeline.run_round(session).await;

        session.phase = if record.is_error() {
            SessionPhase::RoundError
        } else {
            SessionPhase::RoundComplete
        };
        self.publish(session, record.error_message.clone());

        AdvanceOutcome::Round(record)
    }

    async fn finalize(&self, session: &mut Session) -> AdvanceOutcome {
        info!(
            "Reached {} of {} rounds, generating final result",
            session.current_round, session.max_rounds
        );

        let synthesizer = FinalSynthesizer::new(
            self.provider.as_ref(),
            self.artifacts.as_ref(),
            &self.config.markers,
            &self.config.mechanical_words,
        );
        let artifact = synthesizer
            .synthesize(
                &self.synthesis_expert,
                &session.original_text,
                &session.history,
                &session.reference.style_summary,
            )
            .await;

        if session.final_artifact.is_none() {
            session.final_artifact = Some(artifact.clone());
        }
        session.phase = SessionPhase::Finalized;
        self.publish(session, artifact.error_message.clone());

        AdvanceOutcome::Final {
            artifact,
            history: session.history.clone(),
        }
    }

    fn publish(&self, session: &Session, last_error: Option<String>) {
        self.snapshot_tx
            .send_replace(SessionSnapshot::of(session, last_error));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::io::{MemoryArtifactStore, FINAL_ARTIFACT_NAME};
    use crate::models::SynthesisShape;
    use crate::testing::{RecordingObserver, ScriptedProvider};

    fn config(max_rounds: u32) -> AppConfig {
        AppConfig {
            experts: ["A", "B", "C", "D", "Synthesizer"]
                .iter()
                .map(|n| ExpertDefinition::new(*n, "role", "blue"))
                .collect(),
            max_rounds,
            ..AppConfig::default()
        }
    }

    fn build_machine(max_rounds: u32, provider: ScriptedProvider) -> (SessionMachine, Arc<ScriptedProvider>, Arc<MemoryArtifactStore>) {
        let provider = Arc::new(provider);
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let machine = SessionMachine::new(config(max_rounds), provider.clone(), artifacts.clone()).unwrap();
        (machine, provider, artifacts)
    }

    fn reference() -> ReferenceMaterial {
        ReferenceMaterial::from_original("T")
    }

    fn assert_history_matches(machine: &SessionMachine) {
        let session = machine.session().unwrap();
        assert_eq!(session.history.len() as u32, session.current_round);
        assert!(session.current_round <= session.max_rounds);
    }

    #[tokio::test]
    async fn test_single_round_then_synthesis() {
        let (machine, provider, _) = build_machine(1, ScriptedProvider::new(Vec::<String>::new()));

        let outcome = machine.start("T", reference(), None).await;
        let AdvanceOutcome::Round(record) = outcome else {
            panic!("expected a round");
        };
        assert_eq!(record.stage_results.len(), 4);
        let names: Vec<_> = record.stage_results.iter().map(|r| r.stage_name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C", "D"]);

        let outcome = machine.advance().await;
        let AdvanceOutcome::Final { artifact, history } = outcome else {
            panic!("expected final outcome");
        };
        assert_eq!(history.len(), 1);
        // Scripted reply has no final-result marker
        assert_eq!(artifact.final_result, "T");
        assert_eq!(artifact.shape, SynthesisShape::Unstructured);
        assert_eq!(provider.call_count(), 5);
        assert!(provider.prompts()[4].0.contains("Synthesizer"));
    }

    #[tokio::test]
    async fn test_max_rounds_then_idempotent_final() {
        let (machine, provider, _) = build_machine(3, ScriptedProvider::new(Vec::<String>::new()));

        assert!(matches!(machine.start("T", reference(), None).await, AdvanceOutcome::Round(_)));
        assert_history_matches(&machine);
        for _ in 0..2 {
            assert!(matches!(machine.advance().await, AdvanceOutcome::Round(_)));
            assert_history_matches(&machine);
        }
        assert_eq!(provider.call_count(), 12);

        let fourth = machine.advance().await;
        assert!(fourth.is_terminal());
        assert_history_matches(&machine);

        let fifth = machine.advance().await;
        assert!(fifth.is_terminal());
        assert_eq!(provider.call_count(), 14);

        let session = machine.session().unwrap();
        assert_eq!(session.current_round, 3);
        assert_eq!(session.phase, SessionPhase::Finalized);
        assert!(session.final_artifact.is_some());
    }

    #[tokio::test]
    async fn test_stage_failure_keeps_invariant() {
        let provider = ScriptedProvider::new(Vec::<String>::new()).fail_call(0, "boom");
        let (machine, _, _) = build_machine(2, provider);

        let AdvanceOutcome::Round(record) = machine.start("T", reference(), None).await else {
            panic!("expected a round");
        };
        assert!(record.stage_results[0].failed);
        assert!(!record.is_error());
        assert_eq!(record.stage_results.len(), 4);
        assert_history_matches(&machine);
        assert_eq!(machine.snapshot().phase, SessionPhase::RoundComplete);
    }

    #[tokio::test]
    async fn test_concurrent_advance_is_declined() {
        let provider = ScriptedProvider::new(Vec::<String>::new()).delayed(Duration::from_millis(10));
        let (machine, _, _) = build_machine(3, provider);
        machine.start("T", reference(), None).await;

        let (first, second) = tokio::join!(machine.advance(), machine.advance());

        let declined = [&first, &second]
            .iter()
            .filter(|o| matches!(o, AdvanceOutcome::Declined(DeclineReason::Busy)))
            .count();
        assert_eq!(declined, 1);
        assert!(matches!(first, AdvanceOutcome::Round(_)));

        let session = machine.session().unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.current_round, 2);
    }

    #[tokio::test]
    async fn test_advance_before_start() {
        let (machine, provider, _) = build_machine(1, ScriptedProvider::new(Vec::<String>::new()));
        let outcome = machine.advance().await;
        assert!(matches!(outcome, AdvanceOutcome::Declined(DeclineReason::NotStarted)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_start_rejects_zero_rounds() {
        let (machine, provider, _) = build_machine(1, ScriptedProvider::new(Vec::<String>::new()));
        let outcome = machine.start("T", reference(), Some(0)).await;
        assert!(matches!(outcome, AdvanceOutcome::Declined(DeclineReason::InvalidMaxRounds)));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(machine.snapshot().phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_stop_prevents_next_round() {
        let (machine, provider, _) = build_machine(3, ScriptedProvider::new(Vec::<String>::new()));
        machine.start("T", reference(), None).await;

        machine.request_stop();
        let outcome = machine.advance().await;
        assert!(matches!(outcome, AdvanceOutcome::Declined(DeclineReason::Stopped)));
        assert_eq!(provider.call_count(), 4);
        assert_history_matches(&machine);

        // A fresh start clears the stop request
        assert!(matches!(machine.start("T", reference(), None).await, AdvanceOutcome::Round(_)));
        assert!(matches!(machine.advance().await, AdvanceOutcome::Round(_)));
    }

    #[tokio::test]
    async fn test_restart_resets_history_and_artifacts() {
        let (machine, _, artifacts) = build_machine(1, ScriptedProvider::new(Vec::<String>::new()));
        machine.run_to_completion("first", reference(), None).await;
        assert!(artifacts.get(FINAL_ARTIFACT_NAME).is_some());

        let first_id = machine.snapshot().session_id;
        machine.start("second", reference(), Some(2)).await;

        let session = machine.session().unwrap();
        assert_ne!(session.id, first_id);
        assert_eq!(session.original_text, "second");
        assert_eq!(session.max_rounds, 2);
        assert_eq!(session.history.len(), 1);
        assert!(session.final_artifact.is_none());
        assert!(artifacts.get(FINAL_ARTIFACT_NAME).is_none());
        assert_eq!(artifacts.names().len(), 4);

        // max_rounds carries over when not given
        machine.start("third", reference(), None).await;
        assert_eq!(machine.session().unwrap().max_rounds, 2);
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let (machine, _, _) = build_machine(2, ScriptedProvider::new(Vec::<String>::new()));
        machine.start("T", reference(), None).await;

        machine.reset().unwrap();
        let session = machine.session().unwrap();
        assert_eq!(session.phase, SessionPhase::Idle);
        assert!(session.history.is_empty());
        assert_eq!(session.max_rounds, 2);
        assert!(matches!(
            machine.advance().await,
            AdvanceOutcome::Declined(DeclineReason::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_snapshots_track_progress() {
        let (machine, _, _) = build_machine(2, ScriptedProvider::new(Vec::<String>::new()));
        let mut rx = machine.subscribe();

        machine.start("T", reference(), None).await;
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.current_round, 1);
        assert_eq!(snapshot.progress_percent, 50);
        assert_eq!(snapshot.phase, SessionPhase::RoundComplete);

        machine.run_to_completion("T", reference(), None).await;
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.progress_percent, 100);
        assert_eq!(snapshot.phase, SessionPhase::Finalized);
    }

    #[tokio::test]
    async fn test_spawn_advance_in_background() {
        let (machine, _, _) = build_machine(2, ScriptedProvider::new(Vec::<String>::new()));
        let machine = Arc::new(machine);
        machine.start("T", reference(), None).await;

        let outcome = machine.spawn_advance().await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Round(ref r) if r.round_number == 2));
    }

    #[tokio::test]
    async fn test_observer_sees_every_stage() {
        let provider = ScriptedProvider::new(Vec::<String>::new()).chunked(3);
        let observer = Arc::new(RecordingObserver::default());
        let (machine, _, _) = build_machine(1, provider);
        let machine = machine.with_observer(observer.clone());

        machine.start("T", reference(), None).await;

        let completed: Vec<_> = observer
            .events()
            .into_iter()
            .filter(|e| !e.is_chunk)
            .map(|e| e.stage_name)
            .collect();
        assert_eq!(completed, ["A", "B", "C", "D"]);
        assert!(observer.events().iter().any(|e| e.is_chunk));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = config(1);
        config.experts.truncate(1);
        let result = SessionMachine::new(
            config,
            Arc::new(ScriptedProvider::default()),
            Arc::new(MemoryArtifactStore::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_progress_percent() {
        let mut session = Session::new("T", reference(), 3);
        assert_eq!(session.progress_percent(), 0);
        session.current_round = 2;
        assert_eq!(session.progress_percent(), 66);
        session.current_round = 3;
        assert_eq!(session.progress_percent(), 100);
    }
}
