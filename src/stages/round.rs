use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::config::CarryOverPolicy;
use crate::models::{split_lineup, ExpertDefinition, RoundRecord, StageResult};
use crate::session::Session;
use crate::stages::{append_context, render_history, StageRunner};

/// Runs every per-round expert once, in order, over the session's article
pub struct RoundPipeline<'a> {
    runner: &'a StageRunner<'a>,
    /// Full lineup; the trailing synthesis expert is skipped
    experts: &'a [ExpertDefinition],
    carry_over: CarryOverPolicy,
}

impl<'a> RoundPipeline<'a> {
    pub fn new(runner: &'a StageRunner<'a>, experts: &'a [ExpertDefinition], carry_over: CarryOverPolicy) -> Self {
        Self {
            runner,
            experts,
            carry_over,
        }
    }

    /// Run the next round, append its record to the history and advance the
    /// round counter.
    ///
    /// An orchestration error still yields an appended record (with
    /// `error_message` set and whatever stages completed) and still advances
    /// the counter, so the session stays resumable.
    pub async fn run_round(&self, session: &mut Session) -> RoundRecord {
        let round_number = session.current_round + 1;
        info!("Starting round {} of {}", round_number, session.max_rounds);

        let mut stage_results = Vec::new();
        let record = match self.run_stages(session, round_number, &mut stage_results).await {
            Ok(()) => RoundRecord::completed(round_number, stage_results),
            Err(e) => {
                warn!("Round {} failed: {:#}", round_number, e);
                RoundRecord::errored(round_number, stage_results, format!("{:#}", e))
            }
        };

        session.history.push(record.clone());
        session.current_round += 1;

        info!(
            "Round {} complete: {} stages, {} failed",
            round_number,
            record.stage_results.len(),
            record.failed_stages()
        );

        record
    }

    async fn run_stages(
        &self,
        session: &Session,
        round_number: u32,
        results: &mut Vec<StageResult>,
    ) -> Result<()> {
        let (revision_experts, _) = split_lineup(self.experts)
            .ok_or_else(|| anyhow!("no revision experts configured ({} experts)", self.experts.len()))?;

        let mut current_text = self.starting_text(session);
        let mut context = render_history(&session.history);

        for expert in revision_experts {
            let result = self
                .runner
                .execute(round_number, expert, &current_text, &session.reference, &context)
                .await;

            current_text.clone_from(&result.extracted_article);
            context = append_context(&context, &result.stage_name, &result.raw_output);
            results.push(result);
        }

        Ok(())
    }

    fn starting_text(&self, session: &Session) -> String {
        match self.carry_over {
            CarryOverPolicy::ResetEachRound => session.original_text.clone(),
            CarryOverPolicy::CarryForward => session
                .history
                .last()
                .and_then(RoundRecord::last_article)
                .unwrap_or(&session.original_text)
                .to_string(),
        }
    }
}
