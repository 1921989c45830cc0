//! # Timeout Monitor
//!
//! Out-of-band budget check. It has no timer of its own: an external
//! scheduler (HTTP endpoint, CLI, cron) calls `check` or `sweep`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::failure::FailureDisposition;
use super::stage::Stage;

/// Result of checking one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TimeoutCheck {
    /// No live timeout record (never started, finished or already handled)
    NoRecord,
    #[serde(rename_all = "camelCase")]
    WithinBudget { elapsed_ms: i64, budget_ms: u64 },
    #[serde(rename_all = "camelCase")]
    TimedOut {
        stage: Stage,
        elapsed_ms: i64,
        budget_ms: u64,
        /// False when the request was already terminal
        recorded: bool,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    /// Requests this sweep moved to `failed`
    pub timed_out: Vec<String>,
    /// Over budget, but already completed or failed before the sweep reached them
    pub already_terminal: Vec<String>,
    pub errors: usize,
}

pub struct TimeoutMonitor {
    ctx: PipelineContext,
}

impl TimeoutMonitor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn check(&self, request_id: &str) -> Result<TimeoutCheck, PipelineError> {
        self.check_at(request_id, Utc::now())
    }

    #[tracing::instrument(skip(self, now))]
    pub fn check_at(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TimeoutCheck, PipelineError> {
        let Some(record) = self.ctx.timeouts.get(request_id)? else {
            return Ok(TimeoutCheck::NoRecord);
        };

        let elapsed_ms = record.elapsed_ms(now);
        let budget_ms = record.max_duration_ms;
        if !record.is_exceeded(now) {
            return Ok(TimeoutCheck::WithinBudget {
                elapsed_ms,
                budget_ms,
            });
        }

        let stage = self
            .ctx
            .requests
            .load(request_id)?
            .and_then(|request| {
                request
                    .active_entry()
                    .map(|entry| entry.agent)
                    .or_else(|| request.status.active_stage())
            })
            .unwrap_or(Stage::Research);

        tracing::warn!(stage = %stage, elapsed_ms, budget_ms, "Processing budget exceeded");
        let err = PipelineError::Timeout {
            elapsed_ms,
            budget_ms,
        };
        let disposition = self.ctx.failures.fail(request_id, stage, &err)?;
        self.ctx.timeouts.delete(request_id)?;

        Ok(TimeoutCheck::TimedOut {
            stage,
            elapsed_ms,
            budget_ms,
            recorded: disposition == FailureDisposition::Recorded,
        })
    }

    /// Check every request with a live timeout record
    pub fn sweep(&self) -> Result<SweepReport, PipelineError> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let mut report = SweepReport::default();

        for request_id in self.ctx.timeouts.pending_ids()? {
            report.checked += 1;
            match self.check_at(&request_id, now) {
                Ok(TimeoutCheck::TimedOut { recorded: true, .. }) => {
                    report.timed_out.push(request_id)
                }
                Ok(TimeoutCheck::TimedOut { recorded: false, .. }) => {
                    report.already_terminal.push(request_id)
                }
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(request_id = %request_id, "Timeout check failed: {}", e);
                }
            }
        }

        if !report.timed_out.is_empty() || !report.already_terminal.is_empty() {
            tracing::info!(
                "Timeout sweep: {} checked, {} timed out, {} already terminal",
                report.checked,
                report.timed_out.len(),
                report.already_terminal.len()
            );
        }
        Ok(report)
    }
}
