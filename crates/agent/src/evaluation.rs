//! Self-evaluation: an optional policy hook that reviews a final answer
//! before the run accepts it.
//!
//! A [`Verdict::Revise`] sends the run back to THINKING with the critique
//! appended as a synthetic observation. The revision costs an iteration,
//! not a retry.

use async_trait::async_trait;
use semloop_core::message::Message;
use semloop_core::provider::{Provider, ProviderRequest};
use semloop_parsers::{JsonParser, OutputParser, ParseResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::state::Step;

/// Outcome of reviewing a candidate answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Try again; the string is shown to the model.
    Revise(String),
}

#[async_trait]
pub trait SelfEvaluator: Send + Sync {
    async fn evaluate(&self, goal: &str, answer: &str, steps: &[Step]) -> Verdict;
}

/// Asks a model to grade the answer.
///
/// The model must reply with `{"accept": bool, "critique": "..."}`. Any
/// failure of the evaluation itself accepts the answer: a broken reviewer
/// never blocks a run.
pub struct ModelEvaluator {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
}

impl ModelEvaluator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, goal: &str, answer: &str, steps: &[Step]) -> ProviderRequest {
        let observations: Vec<&str> = steps
            .iter()
            .filter_map(|s| s.observation.as_ref())
            .filter(|o| !o.synthetic)
            .map(|o| o.content.as_str())
            .collect();

        let mut review = format!("Goal: {goal}\n\nProposed answer: {answer}\n");
        if !observations.is_empty() {
            review.push_str("\nTool results seen while answering:\n");
            for observation in observations {
                review.push_str(&format!("- {observation}\n"));
            }
        }

        ProviderRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(
                    "You review answers. Reply with a JSON object only: \
                     {\"accept\": true|false, \"critique\": \"what is wrong, if anything\"}",
                ),
                Message::user(review),
            ],
            temperature: 0.0,
            max_tokens: Some(256),
            stop: Vec::new(),
        }
    }
}

#[async_trait]
impl SelfEvaluator for ModelEvaluator {
    async fn evaluate(&self, goal: &str, answer: &str, steps: &[Step]) -> Verdict {
        let request = self.request(goal, answer, steps);
        let response = match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Self-evaluation call failed, accepting answer");
                return Verdict::Accept;
            }
            Err(_) => {
                warn!("Self-evaluation timed out, accepting answer");
                return Verdict::Accept;
            }
        };

        verdict_from(&JsonParser.parse(&response.content))
    }
}

fn verdict_from(result: &ParseResult) -> Verdict {
    let ParseResult::Value { value, .. } = result else {
        warn!("Self-evaluation reply was not JSON, accepting answer");
        return Verdict::Accept;
    };

    if value["accept"].as_bool().unwrap_or(true) {
        debug!("Answer accepted by self-evaluation");
        return Verdict::Accept;
    }

    let critique = value["critique"]
        .as_str()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("The answer was rejected; check it against the goal and try again.");
    Verdict::Revise(critique.to_string())
}
