use std::path::PathBuf;

use clap::{Parser, Subcommand};

use visor_lib::agent_engine::event_bus::StepEvent;
use visor_lib::config;

#[derive(Parser)]
#[command(name = "visor", version, about = "Screen automation agent")]
struct Cli {
    /// Path to config.toml (defaults to next to the executable, then the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task until it completes, fails or is stopped (Ctrl-C)
    Run {
        task: String,
        #[arg(long)]
        max_steps: Option<u32>,
        /// Always send the full screen to the parser
        #[arg(long)]
        no_crop: bool,
        /// Print the remembered conversation after the run
        #[arg(long)]
        history: bool,
    },
    /// Print the effective configuration
    Config,
}

fn print_event(event: &StepEvent) {
    if let Some(error) = &event.error {
        eprintln!("[step {}] error: {error}", event.step + 1);
    }
    if event.outcome.is_some() {
        return;
    }
    println!("[step {}] {}", event.step + 1, event.message);
    for action in &event.actions_taken {
        println!("    - {action}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    visor_lib::init_tracing();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    match cli.command {
        Command::Config => {
            println!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
        Command::Run {
            task,
            max_steps,
            no_crop,
            history,
        } => {
            if let Some(max) = max_steps {
                cfg.agent.max_steps = max;
            }
            if no_crop {
                cfg.agent.crop_enabled = false;
            }

            let (handle, engine_task) = visor_lib::spawn(cfg)?;
            let mut events = handle.subscribe();
            handle.start(task).await?;

            let (outcome, transcript) = loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("stopping...");
                        handle.stop();
                    }
                    event = events.recv() => match event {
                        Ok(event) => {
                            print_event(&event);
                            if let Some(outcome) = event.outcome {
                                break (outcome, event.history);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event output lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break ("Failed: agent loop exited".to_string(), Vec::new());
                        }
                    },
                }
            };

            if history {
                for line in &transcript {
                    println!("  {line}");
                }
            }
            println!("{outcome}");
            handle.shutdown().await?;
            let _ = engine_task.await;
            if outcome.starts_with("Failed") {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
