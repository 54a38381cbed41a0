//! Headless CLI for the Huginn agent core.
//!
//! Exit codes: 0 on success (including expected structured errors printed
//! to stdout), 1 on user-visible failure.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use huginn::bootstrap;
use huginn::config::load_config;

#[derive(Parser)]
#[command(name = "huginn", version, about = "Local AI assistant core")]
struct Cli {
    /// Path to config.yaml.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat on stdin/stdout.
    Chat,
    /// Run a single message through the agent and print the reply.
    Run {
        /// The user message.
        message: String,
    },
    /// Probe provider health and print a report.
    Health,
    /// Load and validate the configuration.
    ConfigCheck,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::ConfigCheck => {
            println!("config ok: {}", cli.config.display());
            ExitCode::SUCCESS
        }
        Command::Health => {
            let runtime = match bootstrap::build(config, Some(&cli.config)).await {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("startup failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let results = runtime.router.health_check().await;
            if results.is_empty() {
                // Expected structured outcome, not a failure.
                println!("no providers configured");
                return ExitCode::SUCCESS;
            }
            let mut names: Vec<&String> = results.keys().collect();
            names.sort();
            for name in names {
                println!(
                    "{name}: {}",
                    if results[name] { "healthy" } else { "UNHEALTHY" }
                );
            }
            ExitCode::SUCCESS
        }
        Command::Run { message } => {
            let runtime = match bootstrap::build(config, Some(&cli.config)).await {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("startup failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let reply = runtime.gateway.dispatch("cli", "local", &message).await;
            println!("{reply}");
            runtime.mcp.shutdown().await;
            ExitCode::SUCCESS
        }
        Command::Chat => {
            let runtime = match bootstrap::build(config, Some(&cli.config)).await {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("startup failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            // CLI approvals: prompt on stderr, read y/n from stdin.
            runtime.gateway.set_approval_callback(Arc::new(|name, _desc, params| {
                eprint!("approve {name} {params}? [y/N] ");
                let _ = std::io::stderr().flush();
                let mut line = String::new();
                std::io::stdin().lock().read_line(&mut line).is_ok()
                    && line.trim().eq_ignore_ascii_case("y")
            }));

            loop {
                eprint!("> ");
                let _ = std::io::stderr().flush();
                let mut line = String::new();
                match std::io::stdin().read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if text == "/quit" || text == "/exit" {
                    break;
                }
                let reply = runtime.gateway.dispatch("cli", "local", text).await;
                println!("{reply}");
            }
            runtime.mcp.shutdown().await;
            ExitCode::SUCCESS
        }
    }
}
