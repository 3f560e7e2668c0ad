use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genrelay::cli::commands::generate::GenerateArgs;
use genrelay::cli::ui::Output;

#[derive(Parser)]
#[command(name = "genrelay")]
#[command(
    version,
    about = "Dispatch text generation across multiple backends with retry and fallback"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, help = "Config file (default: layered global/project/env)")]
    config: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every configured service
    Health {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Run one generation through the dispatcher
    Generate {
        #[arg(long, short, help = "User prompt")]
        prompt: String,
        #[arg(long, help = "System prompt")]
        system: Option<String>,
        #[arg(long, short, help = "Preferred service (default: auto)")]
        service: Option<String>,
        #[arg(long, help = "Sampling temperature")]
        temperature: Option<f32>,
        #[arg(long, help = "Maximum output tokens")]
        max_tokens: Option<u32>,
        #[arg(long, help = "Request structured JSON output")]
        json: bool,
        #[arg(long, help = "Print usage summary")]
        usage: bool,
        #[arg(long, help = "Overall deadline in seconds")]
        timeout: Option<u64>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mgenrelay encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }

        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            Output::new().error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = genrelay::cli::load_config(cli.config.as_deref())?;
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Health { format } => {
            runtime.block_on(genrelay::cli::commands::health::run(&config, &format))?;
        }
        Commands::Generate {
            prompt,
            system,
            service,
            temperature,
            max_tokens,
            json,
            usage,
            timeout,
        } => {
            let args = GenerateArgs {
                prompt,
                system,
                service,
                temperature,
                max_tokens,
                json,
                usage,
                timeout_secs: timeout,
            };
            runtime.block_on(genrelay::cli::commands::generate::run(&config, args))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                genrelay::cli::commands::config::show(&config, &format)?;
            }
            ConfigAction::Path => {
                genrelay::cli::commands::config::path()?;
            }
        },
    }

    Ok(())
}
