use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use skipper_browser::ChromeBrowser;
use skipper_core::browser::BrowserDriver;
use skipper_core::completion::CompletionClient;
use skipper_core::events::AgentEvent;
use skipper_engine::{Agent, AgentConfig};
use skipper_llm::AnthropicClient;

/// Drive a browser toward a natural-language task with an LLM in the loop.
#[derive(Parser, Debug)]
#[command(name = "skipper", version, about)]
struct Cli {
    /// The task to carry out, e.g. "find the latest Rust release notes".
    task: String,

    /// Model to use for planning.
    #[arg(long)]
    model: Option<String>,

    /// Maximum number of steps before the run is cut off.
    #[arg(long, default_value_t = 25)]
    max_steps: u32,

    /// Token budget per completion request.
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Keep the browser open after the run and leave the transcript in a tab.
    #[arg(long)]
    keep_browser: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .context("ANTHROPIC_API_KEY is not set")?;

    tracing::info!("launching browser");
    let driver: Arc<dyn BrowserDriver> = Arc::new(
        ChromeBrowser::launch()
            .await
            .context("failed to launch Chrome")?,
    );

    let client: Arc<dyn CompletionClient> =
        Arc::new(AnthropicClient::new(api_key, cli.model.as_deref()));
    tracing::info!(model = client.model(), "planner ready");

    let config = AgentConfig {
        max_steps: cli.max_steps,
        max_tokens: cli.max_tokens,
        close_browser_on_finish: !cli.keep_browser,
        ..AgentConfig::default()
    };
    let mut agent = Agent::new(&cli.task, driver, client, config);

    let mut events = agent.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AgentEvent::StepStart { step } => {
                    tracing::info!(step, "step started");
                }
                AgentEvent::ActionStart { name, index, .. } => {
                    tracing::info!(action = %name, index, "invoking");
                }
                AgentEvent::ActionEnd { name, success, .. } => {
                    tracing::info!(action = %name, success, "finished");
                }
                AgentEvent::Stopped => tracing::info!("run stopped"),
                AgentEvent::Completed => {
                    tracing::info!("run completed");
                    break;
                }
            }
        }
    });

    agent.start().await;
    let _ = printer.await;

    println!("steps taken: {}", agent.steps_taken());
    if let Some(record) = agent.history().last() {
        println!("final goal: {}", record.state.next_goal);
        println!("memory: {}", record.state.memory);
        for tab in &record.tabs {
            println!("tab: {} ({})", tab.title, tab.url);
        }
    }

    Ok(())
}
