use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pulsecore::{
    ExecutionContext, ExecutionEvent, ExecutionOutcome, Graph, NodeConfig, NodeEvent, StartMode,
    Value,
};
use pulseruntime::{Executor, FlowRuntime, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Pulse dataflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph document
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Execution context as a JSON object, or a path to one
        #[arg(short, long)]
        context: Option<String>,

        /// Runtime configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Pause between iterations, in milliseconds
        #[arg(long)]
        delay: Option<u64>,

        /// Longest allowed chain of direct-through relays
        #[arg(long)]
        max_relay_depth: Option<usize>,

        /// Cancel the execution after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Start paused; Enter runs one iteration, `c` resumes, `q` cancels
        #[arg(long)]
        step: bool,
    },

    /// Load a graph document and report problems
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Write an example graph document
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,
    },
}

struct RunOptions {
    file: PathBuf,
    context: Option<String>,
    config: Option<PathBuf>,
    delay: Option<u64>,
    max_relay_depth: Option<usize>,
    timeout_ms: Option<u64>,
    step: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            context,
            config,
            delay,
            max_relay_depth,
            timeout_ms,
            step,
        } => {
            run_graph(RunOptions {
                file,
                context,
                config,
                delay,
                max_relay_depth,
                timeout_ms,
                step,
            })
            .await?;
        }

        Commands::Validate { file } => {
            validate_graph(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_graph(&output)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn runtime(config: RuntimeConfig) -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(pulsenodes::standard_registry()), config)
}

fn load_context(arg: Option<&str>) -> Result<ExecutionContext> {
    let Some(arg) = arg else {
        return Ok(ExecutionContext::new());
    };
    let text = if Path::new(arg).is_file() {
        std::fs::read_to_string(arg).with_context(|| format!("reading context file {}", arg))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&text).context("context must be a JSON object")
}

async fn run_graph(options: RunOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(delay) = options.delay {
        config.executor.iteration_delay_ms = delay;
    }
    if let Some(depth) = options.max_relay_depth {
        config.executor.max_relay_depth = depth;
    }

    let runtime = runtime(config);
    let context = load_context(options.context.as_deref())?;

    println!("Loading graph from: {}", options.file.display());
    let mut graph = runtime
        .load_file(&options.file)
        .with_context(|| format!("loading graph {}", options.file.display()))?;
    println!("   Nodes: {}", graph.node_count());
    println!("   Edges: {}", graph.edge_count());
    if !graph.incompatible_edges().is_empty() {
        println!("   Incompatible edges: {}", graph.incompatible_edges().len());
    }
    println!();

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let terminal = event.is_terminal();
            print_event(&event);
            if terminal {
                break;
            }
        }
    });

    let executor = runtime.executor().clone();
    let interrupt = {
        let executor = executor.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("Interrupted, cancelling");
                let _ = executor.cancel();
            }
        })
    };
    let timeout = options.timeout_ms.map(|ms| {
        let executor = executor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            tracing::warn!(timeout_ms = ms, "timeout reached, cancelling");
            let _ = executor.cancel();
        })
    });
    let stepper = options.step.then(|| {
        println!("Step mode: Enter = step, c = continue, p = pause, q = cancel");
        tokio::spawn(drive_steps(executor.clone()))
    });

    let mode = if options.step {
        StartMode::Step
    } else {
        StartMode::Continuous
    };
    let result = runtime.execute_with(&mut graph, context, mode).await?;

    interrupt.abort();
    if let Some(task) = timeout {
        task.abort();
    }
    if let Some(task) = stepper {
        task.abort();
    }
    let _ = event_task.await;

    println!();
    println!("Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Iterations: {}", result.iterations);
    println!("   Duration: {}ms", result.duration_ms);
    print_outputs(&graph);

    match result.outcome {
        ExecutionOutcome::Completed => Ok(()),
        ExecutionOutcome::Cancelled => bail!("execution cancelled"),
        ExecutionOutcome::Failed { error } => bail!("execution failed: {}", error),
    }
}

async fn drive_steps(executor: Executor) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let outcome = match line.trim() {
            "" | "s" => executor.step_forward(),
            "c" => executor.resume(),
            "p" => executor.pause(),
            "q" => executor.cancel(),
            other => {
                println!("unknown command: {}", other);
                continue;
            }
        };
        if let Err(e) = outcome {
            println!("{}", e);
        }
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::Started {
            node_count,
            edge_count,
            ..
        } => {
            println!("Execution started ({} nodes, {} edges)", node_count, edge_count);
        }
        ExecutionEvent::StateChanged { from, to, .. } => {
            println!("  state: {} -> {}", from, to);
        }
        ExecutionEvent::Iteration { iteration, .. } => {
            println!("Iteration {}", iteration);
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  > {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            success,
            error,
            duration_ms,
            ..
        } => {
            if *success {
                println!("  ok {} in {}ms", node_id, duration_ms);
            } else {
                println!(
                    "  FAILED {}: {}",
                    node_id,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        ExecutionEvent::DataPropagated {
            node_id, transfers, ..
        } => {
            for transfer in transfers {
                println!(
                    "  {} -> {}: {}",
                    node_id, transfer.to_port, transfer.value
                );
            }
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => println!("     [{}] {}", node_id, message),
            NodeEvent::Warning { message } => println!("     [{}] warning: {}", node_id, message),
            NodeEvent::Progress { percent, message } => match message {
                Some(msg) => println!("     [{}] {}% - {}", node_id, percent, msg),
                None => println!("     [{}] {}%", node_id, percent),
            },
        },
        ExecutionEvent::Completed { result, .. } => {
            println!("Execution completed in {}ms", result.duration_ms);
        }
        ExecutionEvent::Cancelled { result, .. } => {
            println!("Execution cancelled after {} iterations", result.iterations);
        }
        ExecutionEvent::Failed { error, .. } => {
            println!("Execution failed: {}", error);
        }
    }
}

fn print_outputs(graph: &Graph) {
    let mut header = false;
    for node in graph.nodes() {
        let outputs: Vec<_> = node
            .outputs()
            .iter()
            .filter(|(_, port)| !port.peek().is_null())
            .collect();
        if outputs.is_empty() {
            continue;
        }
        if !header {
            println!();
            println!("Outputs:");
            header = true;
        }
        println!("   {} ({}):", node.label(), node.type_id());
        for (name, port) in outputs {
            println!("     {}: {}", name, port.peek());
        }
    }
}

fn validate_graph(file: &Path) -> Result<()> {
    println!("Validating graph: {}", file.display());

    let runtime = runtime(RuntimeConfig::default());
    let graph = runtime
        .load_file(file)
        .with_context(|| format!("loading graph {}", file.display()))?;

    println!("   Nodes: {}", graph.node_count());
    println!("   Edges: {}", graph.edge_count());

    let mut problems = 0;
    for edge in graph.incompatible_edges() {
        problems += 1;
        let from = graph.port(edge.from_port_id).map(|p| p.data_type());
        let to = graph.port(edge.to_port_id).map(|p| p.data_type());
        println!(
            "   incompatible edge {} -> {} ({:?} -> {:?})",
            edge.from_port_id, edge.to_port_id, from, to
        );
    }
    for cycle in graph.find_relay_cycles() {
        problems += 1;
        let labels: Vec<&str> = cycle
            .iter()
            .filter_map(|id| graph.node(*id).map(|n| n.label()))
            .collect();
        println!("   direct-through relay cycle: {}", labels.join(" -> "));
    }

    if problems > 0 {
        bail!("{} problem(s) found", problems);
    }
    println!("Graph is valid");
    Ok(())
}

fn list_nodes() {
    println!("Available Node Types:");
    println!();

    let registry = pulsenodes::standard_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  - {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  - {}", node_type);
        }
    }
}

/// constant [1, 2, 3] -> distribute -> relay -> log
fn create_example_graph(output: &Path) -> Result<()> {
    let registry = pulsenodes::standard_registry();
    let mut graph = Graph::new();

    let mut source_config = NodeConfig::new();
    source_config.insert(
        "value".to_string(),
        Value::Array(vec![Value::from(1_i64), Value::from(2_i64), Value::from(3_i64)]),
    );
    let source = graph.add_node(registry.create_node("value.constant", "Numbers", source_config)?)?;
    let distribute =
        graph.add_node(registry.create_node("flow.distribute", "Each", NodeConfig::new())?)?;
    let relay = graph.add_node(registry.create_node("flow.relay", "Relay", NodeConfig::new())?)?;
    let log = graph.add_node(registry.create_node("debug.log", "Log", NodeConfig::new())?)?;

    connect(&mut graph, (source, "value"), (distribute, "items"))?;
    connect(&mut graph, (distribute, "item"), (relay, "in"))?;
    connect(&mut graph, (relay, "out"), (log, "message"))?;

    let json = serde_json::to_string_pretty(&graph.to_document())?;
    std::fs::write(output, json)?;

    println!("Created example graph: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  pulse run --file {}", output.display());

    Ok(())
}

fn connect(
    graph: &mut Graph,
    (from_node, from_port): (pulsecore::NodeId, &str),
    (to_node, to_port): (pulsecore::NodeId, &str),
) -> Result<()> {
    let from = graph
        .node(from_node)
        .and_then(|n| n.output(from_port))
        .map(|p| p.id())
        .with_context(|| format!("missing output port {}", from_port))?;
    let to = graph
        .node(to_node)
        .and_then(|n| n.input(to_port))
        .map(|p| p.id())
        .with_context(|| format!("missing input port {}", to_port))?;
    graph.add_edge(from, to)?;
    Ok(())
}
