//! End-to-end pipeline runs against in-memory stores and scripted collaborators.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::*;
use crate::config::PipelineConfig;
use crate::skills::fakes::{FakeVerifier, ScriptedGenerator};
use crate::skills::generator::CurationDraft;
use crate::state::{
    ItineraryArchive, ItineraryRequest, LogStatus, PipelineDb, RequestStore,
    SqliteItineraryArchive, StageResultCache, TtlStore,
};

/// Forwards to a channel except for one stage, whose handoff always fails
struct RefusingTransport {
    refuse: Option<Stage>,
    inner: ChannelTransport,
}

#[async_trait]
impl StageTransport for RefusingTransport {
    async fn dispatch(&self, stage: Stage, invocation: StageInvocation) -> Result<(), PipelineError> {
        if self.refuse == Some(stage) {
            return Err(PipelineError::Handoff {
                stage,
                message: "connection refused".to_string(),
            });
        }
        self.inner.dispatch(stage, invocation).await
    }
}

struct Harness {
    ctx: PipelineContext,
    agents: Arc<StageAgents>,
    orchestrator: Orchestrator,
    monitor: TimeoutMonitor,
    archive: Arc<SqliteItineraryArchive>,
    kv: TtlStore,
    rx: mpsc::Receiver<Dispatch>,
}

type StepResult = (Stage, Result<StageOutcome, PipelineError>);

impl Harness {
    fn new() -> Self {
        Self::build(ScriptedGenerator::new(), FakeVerifier::new(), None)
    }

    fn build(generator: ScriptedGenerator, verifier: FakeVerifier, refuse: Option<Stage>) -> Self {
        let db = PipelineDb::open_in_memory().unwrap();
        let config = PipelineConfig {
            validation_delay_ms: 0,
            ..PipelineConfig::default()
        };
        let (inner, rx) = ChannelTransport::new();
        let transport = Arc::new(RefusingTransport { refuse, inner });
        let ctx = PipelineContext::new(&db, config, transport);

        let archive = Arc::new(SqliteItineraryArchive::new(&db));
        let agents = Arc::new(StageAgents::new(
            &ctx,
            Collaborators {
                generator: Arc::new(generator),
                verifier: Arc::new(verifier),
                archive: archive.clone(),
            },
        ));

        Self {
            orchestrator: Orchestrator::new(ctx.clone()),
            monitor: TimeoutMonitor::new(ctx.clone()),
            kv: TtlStore::new(&db),
            ctx,
            agents,
            archive,
            rx,
        }
    }

    fn create(&self, id: &str) {
        let mut request = ItineraryRequest::with_id(id, "u1", json!({"destination": "Paris"}));
        self.ctx.requests.create(&mut request).unwrap();
    }

    fn request(&self, id: &str) -> ItineraryRequest {
        self.ctx.requests.require(id).unwrap()
    }

    /// Run the next queued handoff, if any
    async fn step(&mut self) -> Option<StepResult> {
        let Dispatch { stage, invocation } = self.rx.try_recv().ok()?;
        let result = self.agents.get(stage).run(&invocation).await;
        Some((stage, result))
    }

    /// Run queued handoffs until none are left, checking the single-running invariant
    async fn drain(&mut self, id: &str) -> Vec<StepResult> {
        let mut steps = Vec::new();
        while let Some(step) = self.step().await {
            assert!(self.request(id).running_count() <= 1);
            steps.push(step);
        }
        steps
    }

    fn has_key(&self, key: &str) -> bool {
        self.kv.contains(key).unwrap()
    }
}

#[tokio::test]
async fn test_curation_failure_stops_pipeline() {
    let mut h = Harness::build(
        ScriptedGenerator::new().failing_curation("OpenAI API Error"),
        FakeVerifier::new(),
        None,
    );
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();

    let steps = h.drain("r1").await;
    assert_eq!(steps.len(), 2);
    assert!(steps[0].1.is_ok());
    let (stage, result) = &steps[1];
    assert_eq!(*stage, Stage::Curation);
    assert_eq!(result.as_ref().unwrap_err().to_string(), "OpenAI API Error");

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.processing_log.len(), 2);
    assert_eq!(request.processing_log[0].status, LogStatus::Completed);

    let curation = &request.processing_log[1];
    assert_eq!(curation.agent, Stage::Curation);
    assert_eq!(curation.status, LogStatus::Failed);
    assert_eq!(curation.error.as_ref().unwrap().message, "OpenAI API Error");
    assert_eq!(
        request.error_details.as_ref().unwrap().code,
        "UPSTREAM_FAILURE"
    );

    assert!(!h.has_key("curation_results:r1"));
    // Completed upstream results outlive the failure
    assert!(h.has_key("research_results:r1"));
}

#[tokio::test]
async fn test_full_run_completes_and_cleans_up() {
    let mut h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    assert!(h.has_key("processing_timeout:r1"));

    let steps = h.drain("r1").await;
    let stages: Vec<Stage> = steps.iter().map(|(s, _)| *s).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert!(steps.iter().all(|(_, r)| r.is_ok()));

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Completed);
    assert_eq!(request.processing_log.len(), 4);
    assert!(request
        .processing_log
        .iter()
        .all(|e| e.status == LogStatus::Completed && e.end_time.is_some()));
    assert!(request.error_details.is_none());

    let itinerary = h.archive.fetch("r1").await.unwrap().unwrap();
    assert_eq!(itinerary.user_id, "u1");
    assert_eq!(itinerary.stats.total_activities, 3);

    assert!(h.has_key("itinerary_request:r1"));
    for stage in Stage::ALL {
        assert!(!h.has_key(&StageResultCache::key(stage, "r1")));
    }
    assert!(!h.has_key("processing_timeout:r1"));
}

#[tokio::test]
async fn test_outcome_reports_stage_summary() {
    let mut h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();

    let (_, research) = h.step().await.unwrap();
    let research = research.unwrap();
    assert_eq!(research.next, Some(Stage::Curation));
    let data = research.to_data();
    assert_eq!(data["status"], "research-completed");
    assert_eq!(data["destinationAnalyzed"], "Paris");
    assert_eq!(data["placesFound"], 3);

    let (_, curation) = h.step().await.unwrap();
    assert_eq!(curation.unwrap().summary["daysPlanned"], 2);
}

#[tokio::test]
async fn test_missing_upstream_mutates_nothing() {
    let h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    let before = h.request("r1");

    let err = h
        .agents
        .get(Stage::Curation)
        .run(&StageInvocation::unkeyed("r1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingUpstreamResult {
            stage: Stage::Research,
            ..
        }
    ));
    assert_eq!(h.request("r1"), before);
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let h = Harness::new();
    let err = h
        .agents
        .get(Stage::Research)
        .run(&StageInvocation::unkeyed("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn test_stage_not_active_is_rejected_without_mutation() {
    let h = Harness::new();
    h.create("r1");
    let before = h.request("r1");

    let err = h
        .agents
        .get(Stage::Research)
        .run(&StageInvocation::unkeyed("r1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(h.request("r1"), before);
}

#[tokio::test]
async fn test_mismatched_idempotency_key_is_conflict() {
    let mut h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    let before = h.request("r1");

    let err = h
        .agents
        .get(Stage::Research)
        .run(&StageInvocation::new("r1", "not-the-token"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Conflict(_)));
    assert_eq!(h.request("r1"), before);

    // The legitimate handoff still runs
    let (_, result) = h.step().await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_reinvoking_completed_stage_is_replay() {
    let mut h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    h.drain("r1").await;
    let before = h.request("r1");
    let token = before.processing_log[0].invocation_id.clone();

    for invocation in [StageInvocation::new("r1", token), StageInvocation::unkeyed("r1")] {
        let outcome = h.agents.get(Stage::Research).run(&invocation).await.unwrap();
        assert!(outcome.replayed);
        assert_eq!(outcome.summary["placesFound"], 3);
        assert_eq!(outcome.to_data()["replayed"], true);
    }

    assert_eq!(h.request("r1"), before);
    assert!(h.step().await.is_none());
}

#[tokio::test]
async fn test_begin_preconditions() {
    let h = Harness::new();
    assert!(matches!(
        h.orchestrator.begin("ghost").await,
        Err(PipelineError::NotFound(_))
    ));

    h.create("r1");
    let started = h.orchestrator.begin("r1").await.unwrap();
    assert_eq!(started.status, RequestStatus::ResearchInProgress);
    assert_eq!(started.running_count(), 1);

    let before = h.request("r1");
    assert!(matches!(
        h.orchestrator.begin("r1").await,
        Err(PipelineError::InvalidTransition { .. })
    ));
    assert_eq!(h.request("r1"), before);
}

#[tokio::test]
async fn test_submit_validates_input() {
    let h = Harness::new();
    let request = h
        .orchestrator
        .submit("u1", json!({"destination": "Rome"}))
        .unwrap();
    assert_eq!(h.request(&request.id).status, RequestStatus::Initiated);

    assert!(matches!(
        h.orchestrator.submit("u1", json!("Rome")),
        Err(PipelineError::Validation(_))
    ));
    assert!(matches!(
        h.orchestrator.submit(" ", json!({})),
        Err(PipelineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_failed_first_handoff_fails_request() {
    let h = Harness::build(
        ScriptedGenerator::new(),
        FakeVerifier::new(),
        Some(Stage::Research),
    );
    h.create("r1");

    let err = h.orchestrator.begin("r1").await.unwrap_err();
    assert_eq!(err.code(), "HANDOFF_FAILED");

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.processing_log[0].status, LogStatus::Failed);
}

#[tokio::test]
async fn test_handoff_failure_is_attributed_to_next_stage() {
    let mut h = Harness::build(
        ScriptedGenerator::new(),
        FakeVerifier::new(),
        Some(Stage::Validation),
    );
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();

    let steps = h.drain("r1").await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1].1.as_ref().unwrap_err().code(), "HANDOFF_FAILED");

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Failed);
    let curation = request.last_entry_for(Stage::Curation).unwrap();
    assert_eq!(curation.status, LogStatus::Completed);
    let validation = request.last_entry_for(Stage::Validation).unwrap();
    assert_eq!(validation.status, LogStatus::Failed);
    assert_eq!(validation.error.as_ref().unwrap().code, "HANDOFF_FAILED");
    // Curation's work is kept even though the handoff failed
    assert!(h.has_key("curation_results:r1"));
}

#[tokio::test]
async fn test_malformed_draft_is_validation_failure() {
    let mut h = Harness::build(
        ScriptedGenerator::new().with_curation(CurationDraft { days: Vec::new() }),
        FakeVerifier::new(),
        None,
    );
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    h.drain("r1").await;

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(
        request.error_details.unwrap().code,
        "VALIDATION_ERROR"
    );
    assert!(!h.has_key("curation_results:r1"));
}

#[tokio::test]
async fn test_failed_verifications_do_not_fail_the_stage() {
    let mut h = Harness::build(
        ScriptedGenerator::new(),
        FakeVerifier::new().failing("Louvre").missing("Orsay"),
        None,
    );
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    h.drain("r1").await;

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Completed);
    let validation = request.last_entry_for(Stage::Validation).unwrap();
    assert_eq!(validation.data["failedCount"], 1);
    assert_eq!(validation.data["notFoundCount"], 1);
    assert_eq!(validation.data["verifiedCount"], 1);
}

#[tokio::test]
async fn test_timeout_monitor_within_budget_is_noop() {
    let h = Harness::new();
    h.create("r1");
    assert_eq!(h.monitor.check("r1").unwrap(), TimeoutCheck::NoRecord);

    h.orchestrator.begin("r1").await.unwrap();
    let before = h.request("r1");
    assert!(matches!(
        h.monitor.check("r1").unwrap(),
        TimeoutCheck::WithinBudget {
            budget_ms: 20_000,
            ..
        }
    ));
    assert_eq!(h.request("r1"), before);
    assert!(h.has_key("processing_timeout:r1"));
}

#[tokio::test]
async fn test_timeout_fails_running_stage_once() {
    let mut h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    h.step().await.unwrap().1.unwrap();

    let later = Utc::now() + ChronoDuration::milliseconds(20_500);
    let check = h.monitor.check_at("r1", later).unwrap();
    assert!(matches!(
        check,
        TimeoutCheck::TimedOut {
            stage: Stage::Curation,
            recorded: true,
            ..
        }
    ));

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.error_details.as_ref().unwrap().code, "TIMEOUT");
    let curation = request.last_entry_for(Stage::Curation).unwrap();
    assert_eq!(curation.status, LogStatus::Failed);
    assert_eq!(
        request.last_entry_for(Stage::Research).unwrap().status,
        LogStatus::Completed
    );
    assert!(!h.has_key("processing_timeout:r1"));
    assert_eq!(h.monitor.check_at("r1", later).unwrap(), TimeoutCheck::NoRecord);

    // The queued curation handoff now finds nothing to run
    let (_, late) = h.step().await.unwrap();
    assert!(matches!(late, Err(PipelineError::InvalidTransition { .. })));
    assert_eq!(h.request("r1"), request);
}

#[tokio::test]
async fn test_sweep_checks_every_record() {
    let h = Harness::new();
    h.create("r1");
    h.create("r2");
    h.orchestrator.begin("r1").await.unwrap();
    h.orchestrator.begin("r2").await.unwrap();

    assert!(h.monitor.sweep().unwrap().timed_out.is_empty());

    let report = h
        .monitor
        .sweep_at(Utc::now() + ChronoDuration::seconds(30))
        .unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.timed_out, vec!["r1", "r2"]);
    assert!(report.already_terminal.is_empty());
    assert_eq!(report.errors, 0);
    assert_eq!(h.request("r2").status, RequestStatus::Failed);
}

#[tokio::test]
async fn test_sweep_separates_requests_already_terminal() {
    let h = Harness::new();
    h.create("r1");
    h.create("r2");
    h.orchestrator.begin("r1").await.unwrap();
    h.orchestrator.begin("r2").await.unwrap();

    // r2 fails on its own; its timeout record is still pending
    let err = PipelineError::Upstream("OpenAI API Error".to_string());
    h.ctx.failures.fail("r2", Stage::Research, &err).unwrap();
    let failed = h.request("r2");

    let report = h
        .monitor
        .sweep_at(Utc::now() + ChronoDuration::seconds(30))
        .unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.timed_out, vec!["r1"]);
    assert_eq!(report.already_terminal, vec!["r2"]);

    // The earlier failure is kept as recorded
    assert_eq!(h.request("r2"), failed);
    assert_eq!(failed.error_details.unwrap().code, "UPSTREAM_FAILURE");
    assert!(!h.has_key("processing_timeout:r2"));
}

/// Rewrites the request mid-stage, as a concurrent writer would
struct InterferingWorker {
    requests: Arc<RequestStore>,
}

#[async_trait]
impl StageWorker for InterferingWorker {
    fn stage(&self) -> Stage {
        Stage::Research
    }

    async fn execute(
        &self,
        request: &crate::state::ItineraryRequest,
        _results: &StageResultCache,
    ) -> Result<StageOutput, PipelineError> {
        let mut peer = self.requests.require(&request.id)?;
        self.requests.save(&mut peer)?;
        StageOutput::new(&json!({}), json!({}))
    }
}

#[tokio::test]
async fn test_lost_compare_and_swap_fails_request() {
    let h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();

    let agent = StageAgent::new(
        InterferingWorker {
            requests: Arc::clone(&h.ctx.requests),
        },
        h.ctx.clone(),
    );
    let err = agent
        .run(&StageInvocation::unkeyed("r1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.processing_log.len(), 1);
    assert_eq!(request.processing_log[0].status, LogStatus::Failed);
}

/// Completes research itself mid-stage, as a concurrent invocation of the same stage would
struct PeerCompletingWorker {
    requests: Arc<RequestStore>,
}

#[async_trait]
impl StageWorker for PeerCompletingWorker {
    fn stage(&self) -> Stage {
        Stage::Research
    }

    async fn execute(
        &self,
        request: &crate::state::ItineraryRequest,
        results: &StageResultCache,
    ) -> Result<StageOutput, PipelineError> {
        let mut peer = self.requests.require(&request.id)?;
        let mut summary = serde_json::Map::new();
        summary.insert("placesFound".to_string(), json!(7));
        peer.complete_stage(Stage::Research, summary)?;
        peer.apply(PipelineEvent::StageCompleted(Stage::Research))?;
        peer.start_stage(Stage::Curation, "peer-token");
        self.requests.save(&mut peer)?;
        results.put(Stage::Research, &request.id, &json!({"writer": "peer"}))?;

        StageOutput::new(&json!({"writer": "loser"}), json!({"placesFound": 1}))
    }
}

#[tokio::test]
async fn test_stage_completed_concurrently_is_replayed() {
    let mut h = Harness::new();
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();
    // Drop the queued research handoff; the agent below runs it instead
    assert!(h.rx.try_recv().is_ok());

    let agent = StageAgent::new(
        PeerCompletingWorker {
            requests: Arc::clone(&h.ctx.requests),
        },
        h.ctx.clone(),
    );
    let outcome = agent.run(&StageInvocation::unkeyed("r1")).await.unwrap();
    assert!(outcome.replayed);
    assert_eq!(outcome.summary["placesFound"], 7);
    assert_eq!(outcome.next, None);

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::CurationInProgress);
    assert!(request
        .processing_log
        .iter()
        .all(|e| e.status != LogStatus::Failed));
    assert!(request.error_details.is_none());
    assert_eq!(
        request.running_entry(Stage::Curation).unwrap().invocation_id,
        "peer-token"
    );

    // The losing invocation neither overwrote the result nor handed off
    let cached: serde_json::Value = h.ctx.results.require(Stage::Research, "r1").unwrap();
    assert_eq!(cached["writer"], "peer");
    assert!(h.step().await.is_none());
}

#[tokio::test]
async fn test_undecodable_model_output_is_validation_failure() {
    let mut h = Harness::build(
        ScriptedGenerator::new().malformed_curation(),
        FakeVerifier::new(),
        None,
    );
    h.create("r1");
    h.orchestrator.begin("r1").await.unwrap();

    let steps = h.drain("r1").await;
    assert_eq!(steps[1].1.as_ref().unwrap_err().code(), "VALIDATION_ERROR");

    let request = h.request("r1");
    assert_eq!(request.status, RequestStatus::Failed);
    let curation = request.last_entry_for(Stage::Curation).unwrap();
    assert_eq!(curation.error.as_ref().unwrap().code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_dispatcher_runs_pipeline_in_background() {
    let db = PipelineDb::open_in_memory().unwrap();
    let config = PipelineConfig {
        validation_delay_ms: 0,
        ..PipelineConfig::default()
    };
    let (transport, rx) = ChannelTransport::new();
    let ctx = PipelineContext::new(&db, config, Arc::new(transport));
    let agents = Arc::new(StageAgents::new(
        &ctx,
        Collaborators {
            generator: Arc::new(ScriptedGenerator::new()),
            verifier: Arc::new(FakeVerifier::new()),
            archive: Arc::new(SqliteItineraryArchive::new(&db)),
        },
    ));
    let dispatcher = spawn_stage_dispatcher(agents, rx);

    let orchestrator = Orchestrator::new(ctx.clone());
    let request = orchestrator.submit("u1", json!({"destination": "Paris"})).unwrap();
    orchestrator.begin(&request.id).await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = ctx.requests.require(&request.id).unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(status, RequestStatus::Completed);

    dispatcher.abort();
}
