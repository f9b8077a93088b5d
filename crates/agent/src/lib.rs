//! The reasoning loop: the heart of semloop.
//!
//! A run follows a **Think → Act → Observe** cycle:
//!
//! 1. **Think**: render the goal and prior steps into a prompt and ask the model
//! 2. **Parse** the output into an action, a final answer or a failure
//! 3. **Act**: resolve the action against the run's tools and dispatch it
//! 4. **Observe**: fold the result into the transcript and loop back to 1
//!
//! The loop ends when a final answer is accepted, or when a budget runs
//! out or a non-retriable error occurs. Every transition is published as a
//! [`RunEvent`](semloop_core::RunEvent).

pub mod controller;
pub mod evaluation;
pub mod prompt;
pub mod resolver;
pub mod runner;
pub mod state;

#[cfg(test)]
mod test_helpers;

pub use controller::{LoopSettings, ReasoningLoop, RunOutcome};
pub use evaluation::{ModelEvaluator, SelfEvaluator, Verdict};
pub use resolver::{ActionRequest, ActionResolver};
pub use runner::{AgentRunner, RunRequest, SubmitError};
pub use state::{ExecutionState, FailureReason, LoopState, Observation, RunStatus, Step};
