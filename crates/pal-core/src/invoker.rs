//! The model invoker: one logical model call per agent step.
//!
//! Wraps a `LanguageModel` with a hard per-attempt timeout, bounded retries
//! with exponential backoff and jitter, and a fallback so that a failing
//! model never fails the step. Successful calls emit one structured
//! `generation metrics` event and, with a `GenerationLog` attached, every
//! success and every failed attempt is also appended to the agent's log file.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rand::Rng;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use pal_contracts::{
    agent::AgentId,
    config::{MAX_MODEL_ATTEMPTS, MODEL_TIMEOUT},
    message::{ConversationMessage, GeneratedMessage},
    model::{GenerationRequest, GenerationResponse, ModelError, ModelErrorKind, ToolSpec},
};

use crate::{
    generation_log::{GenerationLog, GenerationRecord},
    traits::LanguageModel,
};

/// Text returned in place of model output once every attempt has failed.
pub const SKIP_TURN_MESSAGE: &str =
    "Skipping this turn due to AI call failure. Will retry next cycle.";

/// Retry and timeout parameters for model calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Hard limit on a single attempt.
    pub timeout: Duration,
    /// Delay before the second attempt; doubles after every failure.
    pub base_delay: Duration,
    /// Floor applied after jitter.
    pub min_delay: Duration,
    /// Jitter is drawn uniformly from `[-max_jitter, max_jitter)`.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_MODEL_ATTEMPTS,
            timeout: MODEL_TIMEOUT,
            base_delay: Duration::from_millis(500),
            min_delay: Duration::from_millis(250),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after failed attempt number `attempt` (1-based).
    ///
    /// `base_delay * 2^(attempt-1) + jitter_ms`, never below `min_delay`.
    pub fn delay_for_attempt(&self, attempt: u32, jitter_ms: i64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.as_millis() as i64 * (1i64 << exponent);
        let floor_ms = self.min_delay.as_millis() as i64;
        Duration::from_millis((base_ms + jitter_ms).max(floor_ms) as u64)
    }

    fn jitter_ms(&self) -> i64 {
        let max = self.max_jitter.as_millis() as i64;
        if max == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(-max..max)
    }
}

/// Whether a failed attempt is worth retrying.
///
/// Cancellations and timeouts, responses without an HTTP status (network
/// errors), 429 and any 5xx are retriable. Other statuses are not.
pub fn is_retriable(error: &ModelError) -> bool {
    if matches!(error.kind, ModelErrorKind::Aborted | ModelErrorKind::Timeout) {
        return true;
    }
    match error.status {
        None => true,
        Some(429) => true,
        Some(status) => (500..600).contains(&status),
    }
}

/// Per-call observability record, emitted on success.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationMetrics {
    pub duration: Duration,
    pub attempts: u32,
    pub tool_calls: usize,
    pub reasoning_chars: usize,
    pub observation_chars: usize,
    pub input_chars: usize,
}

/// Calls a language model with retries, never failing the caller.
pub struct ModelInvoker {
    model: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    log: Option<GenerationLog>,
}

impl ModelInvoker {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model, policy: RetryPolicy::default(), log: None }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append every generation and failed attempt to `log`.
    pub fn with_generation_log(mut self, log: GenerationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Produce the model's messages for one step.
    ///
    /// Returns the generated messages on success. Once every attempt has
    /// failed, or a non-retriable failure occurs, returns a single
    /// `SKIP_TURN_MESSAGE` assistant text instead of an error.
    pub async fn generate(
        &self,
        agent_id: AgentId,
        system: &str,
        tools: Vec<ToolSpec>,
        messages: Vec<ConversationMessage>,
    ) -> Vec<GeneratedMessage> {
        let request = GenerationRequest { system: system.to_string(), tools, messages };
        let started = Instant::now();

        match self.call_with_retry(agent_id, &request).await {
            Ok((response, attempts)) => {
                let metrics = measure(&request, &response, started.elapsed(), attempts);
                info!(
                    agent_id = %agent_id,
                    duration_ms = metrics.duration.as_millis() as u64,
                    attempts = metrics.attempts,
                    tool_calls = metrics.tool_calls,
                    reasoning_chars = metrics.reasoning_chars,
                    observation_chars = metrics.observation_chars,
                    input_chars = metrics.input_chars,
                    "generation metrics"
                );
                if let Some(log) = &self.log {
                    let record = GenerationRecord::Generation {
                        timestamp: Utc::now(),
                        agent_id,
                        duration_ms: metrics.duration.as_millis() as u64,
                        attempts: metrics.attempts,
                        reasoning: reasoning_text(&response),
                        tool_calls: metrics.tool_calls,
                        observation_chars: metrics.observation_chars,
                        input_chars: metrics.input_chars,
                        messages: response.messages.clone(),
                    };
                    log.append(agent_id, &record).await;
                }
                response.messages
            }
            Err(err) => {
                warn!(
                    agent_id = %agent_id,
                    error = %err,
                    "model call failed, skipping turn"
                );
                vec![GeneratedMessage::text(SKIP_TURN_MESSAGE)]
            }
        }
    }

    async fn call_with_retry(
        &self,
        agent_id: AgentId,
        request: &GenerationRequest,
    ) -> Result<(GenerationResponse, u32), ModelError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match timeout(self.policy.timeout, self.model.generate(request)).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::timeout(format!(
                    "model call exceeded {}ms",
                    self.policy.timeout.as_millis()
                ))),
            };

            let err = match outcome {
                Ok(response) => return Ok((response, attempt)),
                Err(err) => err,
            };

            let will_retry = attempt < max_attempts && is_retriable(&err);
            if let Some(log) = &self.log {
                let record = GenerationRecord::AttemptFailed {
                    timestamp: Utc::now(),
                    agent_id,
                    attempt,
                    status: err.status,
                    error: err.to_string(),
                    will_retry,
                };
                log.append(agent_id, &record).await;
            }
            if !will_retry {
                return Err(err);
            }

            let delay = self.policy.delay_for_attempt(attempt, self.policy.jitter_ms());
            debug!(
                agent_id = %agent_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying model call"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// The model's reasoning, or its first assistant text when it gave none.
fn reasoning_text(response: &GenerationResponse) -> Option<String> {
    response.reasoning.clone().or_else(|| {
        response.messages.iter().find_map(|m| match m {
            GeneratedMessage::AssistantText { text } => Some(text.clone()),
            _ => None,
        })
    })
}

fn measure(
    request: &GenerationRequest,
    response: &GenerationResponse,
    duration: Duration,
    attempts: u32,
) -> GenerationMetrics {
    let tool_calls = response
        .messages
        .iter()
        .filter(|m| matches!(m, GeneratedMessage::ToolCall { .. }))
        .count();
    let reasoning_chars = match &response.reasoning {
        Some(r) => r.chars().count(),
        None => response
            .messages
            .iter()
            .find_map(|m| match m {
                GeneratedMessage::AssistantText { text } => Some(text.chars().count()),
                _ => None,
            })
            .unwrap_or(0),
    };
    let observation_chars = request
        .messages
        .iter()
        .rev()
        .find_map(|m| match m {
            ConversationMessage::User(content) => Some(content.chars().count()),
            _ => None,
        })
        .unwrap_or(0);
    let input_chars = request.system.chars().count()
        + request
            .messages
            .iter()
            .map(|m| m.content_text().chars().count())
            .sum::<usize>();

    GenerationMetrics {
        duration,
        attempts,
        tool_calls,
        reasoning_chars,
        observation_chars,
        input_chars,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    /// A model that replays a fixed list of outcomes, then repeats the last.
    struct ScriptedOutcomes {
        outcomes: Vec<Result<GenerationResponse, ModelError>>,
        calls: Arc<Mutex<u32>>,
    }

    impl ScriptedOutcomes {
        fn new(outcomes: Vec<Result<GenerationResponse, ModelError>>) -> Self {
            Self { outcomes, calls: Arc::new(Mutex::new(0)) }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedOutcomes {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, ModelError> {
            let mut calls = self.calls.lock().unwrap();
            let idx = (*calls as usize).min(self.outcomes.len() - 1);
            *calls += 1;
            self.outcomes[idx].clone()
        }
    }

    /// A model whose calls never finish.
    struct HangingModel {
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl LanguageModel for HangingModel {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, ModelError> {
            *self.calls.lock().unwrap() += 1;
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn ok_response() -> GenerationResponse {
        GenerationResponse {
            messages: vec![
                GeneratedMessage::text("heading north"),
                GeneratedMessage::tool_call("move", json!({ "x": 1, "y": 2 })),
            ],
            reasoning: None,
        }
    }

    fn observation() -> Vec<ConversationMessage> {
        vec![ConversationMessage::user("you see a tree")]
    }

    fn is_skip(messages: &[GeneratedMessage]) -> bool {
        messages == [GeneratedMessage::text(SKIP_TURN_MESSAGE)]
    }

    // ── Backoff ──────────────────────────────────────────────────────────────

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1, 0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2, 0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3, 0), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_applies_jitter_and_floor() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1, -100), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(1, 99), Duration::from_millis(599));

        let aggressive = RetryPolicy { base_delay: Duration::from_millis(100), ..RetryPolicy::default() };
        assert_eq!(aggressive.delay_for_attempt(1, -100), Duration::from_millis(250));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let j = policy.jitter_ms();
            assert!((-100..100).contains(&j), "jitter out of range: {j}");
        }
    }

    // ── Retry classification ─────────────────────────────────────────────────

    #[test]
    fn retriable_classification() {
        assert!(is_retriable(&ModelError::aborted("cancelled")));
        assert!(is_retriable(&ModelError::timeout("slow")));
        assert!(is_retriable(&ModelError::network("connection reset")));
        assert!(is_retriable(&ModelError::http(429, "rate limited")));
        assert!(is_retriable(&ModelError::http(500, "boom")));
        assert!(is_retriable(&ModelError::http(503, "unavailable")));
        assert!(!is_retriable(&ModelError::http(400, "bad request")));
        assert!(!is_retriable(&ModelError::http(401, "unauthorized")));
        assert!(!is_retriable(&ModelError::http(404, "not found")));
    }

    // ── Invocation ───────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn success_returns_model_messages() {
        let model = ScriptedOutcomes::new(vec![Ok(ok_response())]);
        let calls = model.calls.clone();
        let invoker = ModelInvoker::new(Arc::new(model));

        let out = invoker.generate(AgentId(1), "sys", vec![], observation()).await;
        assert_eq!(out.len(), 2);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_failures_are_retried_then_succeed() {
        let model = ScriptedOutcomes::new(vec![
            Err(ModelError::http(503, "unavailable")),
            Err(ModelError::network("reset")),
            Ok(ok_response()),
        ]);
        let calls = model.calls.clone();
        let invoker = ModelInvoker::new(Arc::new(model));

        let out = invoker.generate(AgentId(1), "sys", vec![], observation()).await;
        assert!(!is_skip(&out));
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_and_fall_back() {
        let model = ScriptedOutcomes::new(vec![Err(ModelError::http(500, "boom"))]);
        let calls = model.calls.clone();
        let invoker = ModelInvoker::new(Arc::new(model));

        let started = Instant::now();
        let out = invoker.generate(AgentId(1), "sys", vec![], observation()).await;

        assert!(is_skip(&out));
        assert_eq!(*calls.lock().unwrap(), MAX_MODEL_ATTEMPTS);
        // Two backoff sleeps: ~500ms and ~1000ms, each +/- 100ms jitter.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1300), "waited {waited:?}");
        assert!(waited < Duration::from_millis(1800), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_failure_falls_back_immediately() {
        let model = ScriptedOutcomes::new(vec![Err(ModelError::http(400, "bad request"))]);
        let calls = model.calls.clone();
        let invoker = ModelInvoker::new(Arc::new(model));

        let out = invoker.generate(AgentId(1), "sys", vec![], observation()).await;
        assert!(is_skip(&out));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_time_out_and_fall_back() {
        let calls = Arc::new(Mutex::new(0));
        let invoker = ModelInvoker::new(Arc::new(HangingModel { calls: calls.clone() }));

        let started = Instant::now();
        let out = invoker.generate(AgentId(1), "sys", vec![], observation()).await;

        assert!(is_skip(&out));
        assert_eq!(*calls.lock().unwrap(), 3);
        assert!(started.elapsed() >= MODEL_TIMEOUT * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_log_records_failed_attempts_and_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = GenerationLog::new(dir.path());
        let model = ScriptedOutcomes::new(vec![
            Err(ModelError::http(502, "bad gateway")),
            Ok(ok_response()),
        ]);
        let invoker = ModelInvoker::new(Arc::new(model)).with_generation_log(log.clone());

        let out = invoker.generate(AgentId(3), "sys", vec![], observation()).await;
        assert!(!is_skip(&out));

        let contents = std::fs::read_to_string(log.path_for(AgentId(3))).unwrap();
        let lines: Vec<serde_json::Value> =
            contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "attempt_failed");
        assert_eq!(lines[0]["status"], 502);
        assert_eq!(lines[0]["willRetry"], true);
        assert_eq!(lines[1]["event"], "generation");
        assert_eq!(lines[1]["attempts"], 2);
        assert_eq!(lines[1]["toolCalls"], 1);
        assert_eq!(lines[1]["reasoning"], "heading north");
        assert_eq!(lines[1]["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_log_records_final_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = GenerationLog::new(dir.path());
        let model = ScriptedOutcomes::new(vec![Err(ModelError::http(401, "unauthorized"))]);
        let invoker = ModelInvoker::new(Arc::new(model)).with_generation_log(log.clone());

        let out = invoker.generate(AgentId(4), "sys", vec![], observation()).await;
        assert!(is_skip(&out));

        let contents = std::fs::read_to_string(log.path_for(AgentId(4))).unwrap();
        let lines: Vec<serde_json::Value> =
            contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["attempt"], 1);
        assert_eq!(lines[0]["willRetry"], false);
    }

    #[test]
    fn metrics_count_tool_calls_and_sizes() {
        let request = GenerationRequest {
            system: "abc".to_string(),
            tools: vec![],
            messages: observation(),
        };
        let m = measure(&request, &ok_response(), Duration::from_millis(5), 1);
        assert_eq!(m.tool_calls, 1);
        assert_eq!(m.reasoning_chars, "heading north".len());
        assert_eq!(m.observation_chars, "you see a tree".len());
        assert_eq!(m.input_chars, 3 + "you see a tree".len());
    }
}
