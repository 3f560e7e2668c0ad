use console::{StyledObject, style};

use crate::ai::HealthState;

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", style("⚠").yellow(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    /// Dimmed `key: value` line
    pub fn field(&self, key: &str, value: &str) {
        println!("  {} {}", style(format!("{}:", key)).dim(), value);
    }

    /// Coloured health marker for one service
    pub fn health_line(&self, service: &str, state: HealthState, detail: &str) {
        println!("{} {:<12} {}", state_marker(state), service, style(detail).dim());
    }
}

fn state_marker(state: HealthState) -> StyledObject<String> {
    let label = format!("{:<9}", state.to_string());
    match state {
        HealthState::Healthy => style(label).green(),
        HealthState::Degraded => style(label).yellow(),
        HealthState::Unhealthy => style(label).red(),
        HealthState::Unknown => style(label).dim(),
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
