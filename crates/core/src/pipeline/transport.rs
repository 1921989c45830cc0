//! # Stage Transport
//!
//! How one stage hands control to the next. Over HTTP in a deployed setup,
//! over a channel to an in-process dispatcher for the CLI and tests.
//!
//! ```text
//! StageAgent ──dispatch(stage, {requestId, idempotencyKey})──▶ transport
//!                                                               │
//!                     HttpStageTransport: POST {base}/api/v1/agents/{stage}
//!                     ChannelTransport:   mpsc ──▶ spawn_stage_dispatcher ──▶ StageAgent::run
//! ```

use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::agent::StageAgents;
use super::auth::INTERNAL_SECRET_HEADER;
use super::error::PipelineError;
use super::stage::Stage;
use super::wire::StageInvocation;

/// Delivery of a stage invocation
///
/// Success means the receiving stage accepted the call (2xx). Receivers are
/// idempotent on the invocation's key, so implementations may redeliver.
#[async_trait]
pub trait StageTransport: Send + Sync {
    async fn dispatch(&self, stage: Stage, invocation: StageInvocation)
        -> Result<(), PipelineError>;
}

// ============================================================================
// HTTP
// ============================================================================

pub struct HttpStageTransport {
    client: reqwest::Client,
    base_url: String,
    secret: String,
    retries: u32,
    backoff: Duration,
    /// Upper bound on the whole retry sequence
    max_elapsed: Duration,
}

impl HttpStageTransport {
    pub fn new(
        base_url: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            retries: 2,
            backoff: Duration::from_millis(500),
            max_elapsed: timeout,
        })
    }

    /// Extra attempts after the first and the initial delay between them
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn endpoint(&self, stage: Stage) -> String {
        format!("{}/api/v1/agents/{}", self.base_url, stage)
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff)
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }

    /// One POST. Refused connections and 503 are transient, anything else is final.
    async fn attempt(
        &self,
        url: &str,
        invocation: &StageInvocation,
    ) -> Result<(), backoff::Error<String>> {
        let response = self
            .client
            .post(url)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .json(invocation)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    backoff::Error::transient(e.to_string())
                } else {
                    backoff::Error::permanent(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{} returned {}: {}", url, status, body);
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            Err(backoff::Error::transient(message))
        } else {
            Err(backoff::Error::permanent(message))
        }
    }
}

#[async_trait]
impl StageTransport for HttpStageTransport {
    async fn dispatch(
        &self,
        stage: Stage,
        invocation: StageInvocation,
    ) -> Result<(), PipelineError> {
        let url = self.endpoint(stage);
        let attempts = AtomicU32::new(0);
        let (attempts, url_ref, invocation_ref) = (&attempts, url.as_str(), &invocation);

        let operation = || async move {
            let made = attempts.fetch_add(1, Ordering::SeqCst);
            match self.attempt(url_ref, invocation_ref).await {
                Err(backoff::Error::Transient { err, .. }) if made >= self.retries => {
                    Err(backoff::Error::permanent(err))
                }
                other => other,
            }
        };

        backoff::future::retry_notify(
            self.create_backoff(),
            operation,
            |err: String, delay: Duration| {
                tracing::warn!(
                    request_id = %invocation.request_id,
                    stage = %stage,
                    attempt = attempts.load(Ordering::SeqCst),
                    "Handoff failed, retrying in {:?}: {}",
                    delay,
                    err
                );
            },
        )
        .await
        .map_err(|message| PipelineError::Handoff { stage, message })?;

        tracing::debug!(request_id = %invocation.request_id, stage = %stage, "Handoff delivered");
        Ok(())
    }
}

// ============================================================================
// In-process
// ============================================================================

/// A stage invocation queued for the in-process dispatcher
#[derive(Debug)]
pub struct Dispatch {
    pub stage: Stage,
    pub invocation: StageInvocation,
}

pub struct ChannelTransport {
    tx: mpsc::Sender<Dispatch>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its dispatcher drains
    pub fn new() -> (Self, mpsc::Receiver<Dispatch>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StageTransport for ChannelTransport {
    async fn dispatch(
        &self,
        stage: Stage,
        invocation: StageInvocation,
    ) -> Result<(), PipelineError> {
        self.tx
            .send(Dispatch { stage, invocation })
            .await
            .map_err(|_| PipelineError::Handoff {
                stage,
                message: "stage dispatcher is not running".to_string(),
            })
    }
}

/// Run queued invocations against the agents, each on its own task
///
/// Stage failures are already recorded on the request by the agent, so they
/// are only logged here.
pub fn spawn_stage_dispatcher(
    agents: Arc<StageAgents>,
    mut rx: mpsc::Receiver<Dispatch>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Dispatch { stage, invocation }) = rx.recv().await {
            let agents = Arc::clone(&agents);
            tokio::spawn(async move {
                if let Err(e) = agents.get(stage).run(&invocation).await {
                    tracing::warn!(
                        request_id = %invocation.request_id,
                        stage = %stage,
                        code = e.code(),
                        "Stage run failed: {}",
                        e
                    );
                }
            });
        }
        tracing::debug!("Stage dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_transport(server: &MockServer) -> HttpStageTransport {
        HttpStageTransport::new(server.uri(), "s3cret", Duration::from_secs(5))
            .unwrap()
            .with_retries(2, Duration::from_millis(1))
    }

    #[test]
    fn test_endpoint() {
        let transport = HttpStageTransport::new(
            "http://agents:8080/",
            "s3cret",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            transport.endpoint(Stage::Validation),
            "http://agents:8080/api/v1/agents/validation"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_handoff_failure() {
        // Nothing listens on port 9 of localhost
        let transport = HttpStageTransport::new("http://127.0.0.1:9", "s", Duration::from_secs(2))
            .unwrap()
            .with_retries(1, Duration::from_millis(1));

        let err = transport
            .dispatch(Stage::Curation, StageInvocation::new("r1", "k"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Handoff {
                stage: Stage::Curation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unavailable_stage_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agents/curation"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agents/curation"))
            .and(header("x-internal-secret", "s3cret"))
            .and(body_json(json!({"requestId": "r1", "idempotencyKey": "k1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        http_transport(&server)
            .dispatch(Stage::Curation, StageInvocation::new("r1", "k1"))
            .await
            .unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_stop_after_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = http_transport(&server)
            .dispatch(Stage::Validation, StageInvocation::new("r1", "k1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Handoff {
                stage: Stage::Validation,
                ..
            }
        ));
        // The first attempt plus two retries
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_other_error_statuses_are_not_retried() {
        for status in [500u16, 400, 401] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/v1/agents/response"))
                .respond_with(ResponseTemplate::new(status).set_body_string("stage rejected"))
                .mount(&server)
                .await;

            let err = http_transport(&server)
                .dispatch(Stage::Response, StageInvocation::new("r1", "k1"))
                .await
                .unwrap_err();
            match err {
                PipelineError::Handoff { stage, message } => {
                    assert_eq!(stage, Stage::Response);
                    assert!(message.contains(&status.to_string()), "{}", message);
                    assert!(message.contains("stage rejected"), "{}", message);
                }
                other => panic!("unexpected error: {:?}", other),
            }
            assert_eq!(server.received_requests().await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_channel_transport_queues_dispatch() {
        let (transport, mut rx) = ChannelTransport::new();
        transport
            .dispatch(Stage::Research, StageInvocation::new("r1", "k"))
            .await
            .unwrap();

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.stage, Stage::Research);
        assert_eq!(queued.invocation.idempotency_key.as_deref(), Some("k"));

        drop(rx);
        assert!(transport
            .dispatch(Stage::Curation, StageInvocation::new("r1", "k2"))
            .await
            .is_err());
    }
}
