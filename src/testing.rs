//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CompletionError, CompletionProvider};
use crate::models::{StageEvent, StageObserver};

/// Completion provider that replays queued replies.
///
/// Once the queue is empty it answers `reply {n}` for the n-th call.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    failures: HashMap<usize, String>,
    calls: Mutex<usize>,
    prompts: Mutex<Vec<(String, String)>>,
    chunk_size: Option<usize>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Fail the given 0-based call with `message`; no reply is consumed
    pub fn fail_call(mut self, call: usize, message: &str) -> Self {
        self.failures.insert(call, message.to_string());
        self
    }

    /// Deliver streamed replies in chunks of `size` characters
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Sleep before answering each call
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// (system, user) prompt pairs in call order
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let call = *calls;
            *calls += 1;
            call
        };

        if let Some(message) = self.failures.get(&call) {
            return Err(CompletionError::Provider(message.clone()));
        }

        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("reply {}", call)))
    }

    async fn complete_stream(
        &self,
        system: &str,
        user: &str,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, CompletionError> {
        let text = self.complete(system, user).await?;

        match self.chunk_size {
            Some(size) => {
                let chars: Vec<char> = text.chars().collect();
                for piece in chars.chunks(size) {
                    let piece: String = piece.iter().collect();
                    on_chunk(&piece);
                }
            }
            None => on_chunk(&text),
        }

        Ok(text)
    }
}

/// Observer that keeps every event it sees
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StageObserver for RecordingObserver {
    fn on_stage_event(&self, event: &StageEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
