//! Generate Command
//!
//! Runs one dispatch and prints the content. Ctrl-C cancels the dispatch
//! instead of killing the process mid-request.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ai::{DispatchOptions, Dispatcher, GenerationRequest, Message, UsageTracker};
use crate::cli::ui::Output;
use crate::config::Config;
use crate::types::Result;

/// Options for a single generation
#[derive(Debug, Clone, Default)]
pub struct GenerateArgs {
    pub prompt: String,
    pub system: Option<String>,
    pub service: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json: bool,
    pub usage: bool,
    pub timeout_secs: Option<u64>,
}

impl GenerateArgs {
    fn request(&self) -> GenerationRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(self.prompt.clone()));

        let mut request = GenerationRequest::new(messages).with_structured_output(self.json);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}

pub async fn run(config: &Config, args: GenerateArgs) -> Result<()> {
    let tracker = UsageTracker::new(Arc::new(Dispatcher::from_config(config)?));
    let request = args.request();

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received, cancelling dispatch");
            watcher.cancel();
        }
    });

    let mut options = DispatchOptions::new().cancel_token(cancel);
    options.preference = args.service.clone();
    if let Some(secs) = args.timeout_secs {
        options = options.timeout(Duration::from_secs(secs));
    }

    let (envelope, usage) = tracker.generate_with_options(&request, options).await?;

    if args.json {
        match envelope.parse_structured() {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(e) => {
                Output::new().warning(&format!("Response is not valid JSON: {}", e.message));
                println!("{}", envelope.content);
            }
        }
    } else {
        println!("{}", envelope.content);
    }

    if args.usage {
        let output = Output::new();
        output.header("Usage");
        output.field("service", &usage.service);
        output.field("model", &usage.model);
        output.field("latency", &format!("{}ms", usage.latency_ms));
        output.field(
            "tokens",
            &format!(
                "{} (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            ),
        );
        for (key, value) in &envelope.metadata {
            output.field(key, &value.to_string());
        }
    }

    Ok(())
}
