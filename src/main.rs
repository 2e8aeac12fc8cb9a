mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graphrun_core::config::AppConfig;
use graphrun_core::graph::Graph;
use graphrun_core::log::{LogEntry, LogPhase};
use graphrun_core::traits::{CodeExecutor, Collaborators};
use graphrun_engine::{evaluator_for, BroadcastSink, RunContext, RunLogger, Scheduler};
use graphrun_services::{create_token_provider, ProcessSandbox, ServiceClient};

#[derive(Parser)]
#[command(name = "graphrun", version, about = "Run visual workflow graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "graphrun.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Where a graph comes from: a local document or a stored workflow.
#[derive(Args, Debug)]
struct GraphSource {
    /// Graph document (JSON)
    #[arg(required_unless_present = "workflow")]
    graph: Option<PathBuf>,
    /// Fetch the current version of a stored workflow instead
    #[arg(short, long, conflicts_with = "graph")]
    workflow: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph and print the end node's output
    Run {
        #[command(flatten)]
        source: GraphSource,
        /// Initial inputs as JSON, or @path to a JSON file
        #[arg(short, long)]
        inputs: Option<String>,
        /// Write a JSONL run log under this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Print the full execution log instead of a summary
        #[arg(long)]
        verbose: bool,
    },
    /// Show the start node's input parameters
    Params {
        #[command(flatten)]
        source: GraphSource,
    },
    /// List custom tools embedded in a graph
    Tools {
        #[command(flatten)]
        source: GraphSource,
    },
    /// List production workflows stored in the service
    List {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Check configuration and, optionally, a graph
    Doctor {
        graph: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("graphrun=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run {
            source,
            inputs,
            log_dir,
            verbose,
        } => {
            let graph = load_source(&config, &source).await?;
            run_graph(&config, &graph, inputs.as_deref(), log_dir, verbose).await
        }
        Commands::Params { source } => {
            let graph = load_source(&config, &source).await?;
            println!("{}", serde_json::to_string_pretty(&graph.start_params())?);
            Ok(())
        }
        Commands::Tools { source } => {
            let graph = load_source(&config, &source).await?;
            let tools = graph.custom_tools();
            if tools.is_empty() {
                println!("No custom tools.");
            }
            for tool in tools {
                let lines = tool
                    .function_body
                    .as_deref()
                    .map(|b| b.lines().count())
                    .unwrap_or(0);
                println!("  {} ({} lines of code)", tool.tool_name, lines);
            }
            Ok(())
        }
        Commands::List { limit, offset } => {
            let list = service_client(&config)?.list_workflows(limit, offset).await?;
            if list.workflows.is_empty() {
                println!("No workflows.");
            }
            for wf in &list.workflows {
                println!(
                    "  {}  v{}  {}",
                    wf.workflow_id,
                    wf.version,
                    wf.name.as_deref().unwrap_or("(unnamed)")
                );
            }
            println!("\n  {} of {} shown", list.workflows.len(), list.total);
            Ok(())
        }
        Commands::Doctor { graph } => {
            let graph = graph.as_deref().map(load_graph).transpose()?;
            doctor::run_doctor(&config, graph.as_ref());
            Ok(())
        }
    }
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    Ok(Graph::from_json(&json)?)
}

async fn load_source(config: &AppConfig, source: &GraphSource) -> anyhow::Result<Graph> {
    match (&source.workflow, &source.graph) {
        (Some(id), _) => {
            info!(workflow_id = %id, "Fetching workflow");
            Ok(service_client(config)?.fetch_workflow(id).await?)
        }
        (None, Some(path)) => load_graph(path),
        (None, None) => anyhow::bail!("Pass a graph file or --workflow <id>"),
    }
}

fn service_client(config: &AppConfig) -> anyhow::Result<ServiceClient> {
    let tokens = create_token_provider(&config.service)?;
    Ok(ServiceClient::from_config(&config.service, tokens))
}

fn parse_inputs(raw: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => raw.to_string(),
    };
    Ok(serde_json::from_str(&text)?)
}

fn build_collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    let client = Arc::new(service_client(config)?);
    let code = config
        .sandbox
        .clone()
        .map(|s| Arc::new(ProcessSandbox::new(s)) as Arc<dyn CodeExecutor>);
    if code.is_none() {
        info!("No [sandbox] configured, custom tools will fail");
    }

    Ok(Collaborators {
        evaluator: evaluator_for(config.engine.expressions),
        model: client.clone(),
        tools: client.clone(),
        code,
        retrieval: client.clone(),
        transform: client,
    })
}

async fn run_graph(
    config: &AppConfig,
    graph: &Graph,
    inputs: Option<&str>,
    log_dir: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<()> {
    let inputs = parse_inputs(inputs)?;
    let mut ctx = RunContext::new(build_collaborators(config)?).with_settings(config.engine.clone());

    // JSONL run log: CLI flag wins, then an enabled [log] section.
    let log_dir = log_dir.or_else(|| {
        config
            .log
            .as_ref()
            .filter(|l| l.enabled)
            .map(|l| PathBuf::from(l.log_dir.as_deref().unwrap_or("logs")))
    });
    let cancel = CancellationToken::new();
    let mut logger = None;
    if let Some(dir) = log_dir {
        let sink = Arc::new(BroadcastSink::default());
        let rx = sink.subscribe();
        logger = Some(tokio::spawn(RunLogger::new(dir).run(
            rx,
            ctx.run_id().to_string(),
            cancel.clone(),
        )));
        ctx = ctx.with_sink(sink);
    }

    let scheduler = Scheduler::new();
    let result = tokio::select! {
        result = scheduler.run(graph, &ctx, inputs) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping run");
            cancel.cancel();
            anyhow::bail!("Run interrupted");
        }
    };

    let entries = ctx.entries();
    // Dropping the context closes the log channel so the logger drains and exits.
    drop(ctx);
    let log_path = match logger {
        Some(handle) => handle.await.ok().flatten(),
        None => None,
    };

    match result {
        Ok(outcome) => {
            print_log(&outcome.log, verbose);
            match &outcome.result {
                Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
                None => eprintln!("Run finished without reaching an end node."),
            }
            eprintln!("Completed in {} ms", outcome.elapsed_ms);
        }
        Err(e) => {
            print_log(&entries, true);
            if let Some(path) = &log_path {
                eprintln!("Run log: {}", path.display());
            }
            return Err(e.into());
        }
    }
    if let Some(path) = log_path {
        eprintln!("Run log: {}", path.display());
    }
    Ok(())
}

fn print_log(entries: &[LogEntry], verbose: bool) {
    if verbose {
        for entry in entries {
            eprintln!(
                "  [{}] {} {} ({}): {}",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.phase,
                entry.node_id,
                entry.node_kind,
                entry.message
            );
        }
        return;
    }

    let count = |phase: LogPhase| entries.iter().filter(|e| e.phase == phase).count();
    eprintln!(
        "  {} nodes executed, {} warnings, {} errors",
        count(LogPhase::Complete),
        count(LogPhase::Warning),
        count(LogPhase::Error)
    );
    for entry in entries
        .iter()
        .filter(|e| matches!(e.phase, LogPhase::Warning | LogPhase::Error))
    {
        eprintln!("  [{}] {}: {}", entry.phase, entry.node_id, entry.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inputs() {
        assert_eq!(parse_inputs(None).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_inputs(Some(r#"{"q":"rust"}"#)).unwrap()["q"],
            "rust"
        );
        assert!(parse_inputs(Some("not json")).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["graphrun", "run", "g.json", "--inputs", "{}", "--verbose"]);
        match cli.command {
            Commands::Run { source, verbose, .. } => {
                assert_eq!(source.graph, Some(PathBuf::from("g.json")));
                assert!(source.workflow.is_none());
                assert!(verbose);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_accepts_workflow_id() {
        let cli = Cli::parse_from(["graphrun", "params", "--workflow", "wf-1"]);
        match cli.command {
            Commands::Params { source } => {
                assert_eq!(source.workflow.as_deref(), Some("wf-1"));
                assert!(source.graph.is_none());
            }
            _ => panic!("expected params"),
        }

        assert!(Cli::try_parse_from(["graphrun", "tools"]).is_err());
        assert!(Cli::try_parse_from(["graphrun", "run", "g.json", "--workflow", "wf-1"]).is_err());
    }

    #[test]
    fn test_cli_parses_list() {
        let cli = Cli::parse_from(["graphrun", "list", "--limit", "5"]);
        assert!(matches!(cli.command, Commands::List { limit: Some(5), offset: None }));
    }
}
