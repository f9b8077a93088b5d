//! Prompt assembly: the goal and the step history rendered as a transcript.
//!
//! # Transcript layout
//!
//! 1. **System**: the ReAct output format and the run's tool listing
//! 2. **User**: the goal
//! 3. For each prior step with model output: the raw output as an
//!    **assistant** message, then its observation (if any) as a **user**
//!    message prefixed with `Observation:`
//!
//! Steps whose model call failed have no output and are left out, so a
//! provider hiccup never shows up as a gap the model has to explain.

use semloop_core::message::Message;
use semloop_core::tool::ToolSet;

use crate::state::Step;

/// Stop sequence keeping the model from inventing its own observation.
pub const OBSERVATION_STOP: &str = "\nObservation:";

const FORMAT_INSTRUCTIONS: &str = "\
You solve the user's goal step by step. On every turn, think about what to do next, then reply \
in exactly one of these two forms.

To use a tool:
Thought: <your reasoning>
Action: <tool name>
Action Input: <JSON object matching the tool's input schema>

When you know the answer:
Thought: <your reasoning>
Final Answer: <the answer>

Never write both an Action and a Final Answer in the same reply. After an Action, stop and \
wait: the result will be given to you as an Observation.";

/// The system message: output format plus one line per available tool.
pub fn system_prompt(tools: &ToolSet) -> String {
    let mut prompt = String::from(FORMAT_INSTRUCTIONS);
    if tools.is_empty() {
        prompt.push_str("\n\nNo tools are available; answer directly with a Final Answer.");
        return prompt;
    }

    prompt.push_str("\n\nAvailable tools:");
    for descriptor in tools.iter() {
        let schema = serde_json::to_string(&descriptor.input_schema).unwrap_or_default();
        prompt.push_str(&format!(
            "\n- {}: {} Input schema: {}",
            descriptor.name, descriptor.description, schema
        ));
    }
    prompt
}

/// Build the full transcript for the next model invocation.
pub fn build_transcript(goal: &str, tools: &ToolSet, steps: &[Step]) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt(tools)), Message::user(goal)];

    for step in steps {
        let Some(raw) = &step.raw_output else {
            continue;
        };
        messages.push(Message::assistant(raw.clone()));
        if let Some(observation) = &step.observation {
            messages.push(Message::user(format!("Observation: {}", observation.content)));
        }
    }
    messages
}
