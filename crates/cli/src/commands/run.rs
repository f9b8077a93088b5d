//! `semloop run`: Run one goal through the reasoning loop.

use semloop_agent::{AgentRunner, RunRequest, RunStatus};
use semloop_config::AppConfig;
use semloop_core::event::{EventBroadcaster, EventKind, RunEvent};
use std::sync::Arc;
use tracing::debug;

pub struct RunArgs {
    pub goal: String,
    pub tools: Vec<String>,
    pub max_iterations: Option<usize>,
    pub max_retries: Option<usize>,
    pub show_events: bool,
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Local endpoints run without a key; hosted ones fail fast with a clear hint.
    let local = config
        .providers
        .get(&config.default_provider)
        .and_then(|p| p.api_url.as_deref())
        .is_some_and(|url| url.contains("localhost") || url.contains("127.0.0.1"))
        || config.default_provider == "ollama";
    if !config.has_api_key() && !local {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    SEMLOOP_API_KEY     (generic)");
        eprintln!("    OPENROUTER_API_KEY  (recommended)");
        eprintln!("    OPENAI_API_KEY      (for OpenAI direct)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = semloop_providers::router::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;
    debug!(provider = %config.default_provider, model = %config.default_model, "Provider selected");
    let registry = Arc::new(semloop_tools::default_registry());
    let events = Arc::new(EventBroadcaster::new(config.events.capacity, config.events.history));
    let runner = AgentRunner::from_config(&config, provider, registry, events.clone());

    let printer = args.show_events.then(|| {
        let mut subscription = events.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                print_event(&event);
                if event.kind.is_terminal() {
                    break;
                }
            }
        })
    });

    let request = RunRequest {
        goal: args.goal,
        tool_names: args.tools,
        max_iterations: args.max_iterations,
        max_retries: args.max_retries,
    };
    let outcome = runner.submit(request).await?;

    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let steps = outcome.steps.len();
    let tokens = outcome.usage.total_tokens;
    match outcome.status {
        RunStatus::Finished { answer } => {
            println!("{answer}");
            eprintln!("\n  ({steps} steps, {tokens} tokens)");
            Ok(())
        }
        RunStatus::Failed { reason } => {
            eprintln!("\n  ({steps} steps, {tokens} tokens)");
            Err(format!("Run failed: {reason}").into())
        }
    }
}

fn print_event(event: &RunEvent) {
    let payload = &event.payload;
    let detail = match event.kind {
        EventKind::Thought => payload["content"].as_str().unwrap_or_default().trim().to_string(),
        EventKind::Action => format!("{} {}", payload["tool"].as_str().unwrap_or_default(), payload["args"]),
        EventKind::Observation => {
            let marker = if payload["synthetic"].as_bool().unwrap_or(false) {
                " (corrective)"
            } else if payload["is_error"].as_bool().unwrap_or(false) {
                " (error)"
            } else {
                ""
            };
            format!("{}{marker}", payload["content"].as_str().unwrap_or_default())
        }
        EventKind::Finish => payload["answer"].as_str().unwrap_or_default().to_string(),
        EventKind::Error => payload["reason"].as_str().unwrap_or_default().to_string(),
    };
    eprintln!("[{:>3}] {:<11} {}", event.sequence, event.kind.as_str(), detail);
}
