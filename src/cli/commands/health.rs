//! Health Command
//!
//! Probes every registered service (through the TTL cache) and reports state,
//! latency and error.

use crate::ai::Dispatcher;
use crate::cli::is_json;
use crate::cli::ui::Output;
use crate::config::Config;
use crate::types::Result;

pub async fn run(config: &Config, format: &str) -> Result<()> {
    let dispatcher = Dispatcher::from_config(config)?;
    let statuses = dispatcher.all_health().await;

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    let output = Output::new();
    output.header("Service Health");
    for (service, status) in &statuses {
        let mut detail = match status.latency_ms {
            Some(ms) => format!("{}ms", ms),
            None => "-".to_string(),
        };
        if let Some(error) = &status.error {
            detail = format!("{}  {}", detail, error);
        }
        output.health_line(service, status.state, &detail);
    }

    let healthy = statuses.values().filter(|s| s.is_healthy()).count();
    println!();
    if healthy == 0 {
        output.warning("No healthy service; dispatch will still try the fallback chain in order");
    } else {
        output.success(&format!("{}/{} services healthy", healthy, statuses.len()));
    }

    Ok(())
}
