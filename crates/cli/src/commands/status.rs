//! `semloop status`: Show configuration status.

use semloop_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("semloop status");
    println!("==============");
    println!("  Config dir:      {}", AppConfig::config_dir().display());
    println!("  Provider:        {}", config.default_provider);
    println!("  Model:           {}", config.default_model);
    println!("  Temperature:     {}", config.default_temperature);
    println!("  API key:         {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Max iterations:  {}", config.agent.max_iterations);
    println!("  Max retries:     {}", config.agent.max_retries);
    println!(
        "  Timeouts:        model {}s, tool {}s, run {}s",
        config.agent.model_timeout_secs, config.agent.tool_timeout_secs, config.agent.run_timeout_secs
    );
    println!("  No-marker:       {:?}", config.agent.no_marker_policy);
    println!(
        "  Self-evaluation: {}",
        if config.agent.self_evaluation { "enabled" } else { "disabled" }
    );
    println!("  Events:          capacity {}, history {}", config.events.capacity, config.events.history);
    println!("  Gateway:         {}:{}", config.gateway.host, config.gateway.port);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file; defaults in use. Example:\n");
        println!("{}", AppConfig::default_toml());
    }

    Ok(())
}
