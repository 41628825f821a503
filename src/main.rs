//! pflow CLI - run, validate, and inspect declarative workflows

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use pflow::config::{PflowHome, Settings};
use pflow::error::{FixSuggestion, PflowError};
use pflow::mcp::{discovery, McpServersFile, ServerDef};
use pflow::registry::Registry;
use pflow::runtime::{run_workflow, validate_workflow, RunOptions};
use pflow::store::{Value, ValueMap};
use pflow::trace::list_traces;
use pflow::workflows;

#[derive(Parser)]
#[command(name = "pflow")]
#[command(about = "pflow - declarative workflow engine for AI tasks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow (file path or library name) with key=value params
    Run {
        /// Path to a .json / .pflow.md file, or a saved workflow name
        workflow: String,

        /// Workflow inputs as key=value (values parse as JSON, else string)
        params: Vec<String>,

        /// Emit the full JSON report envelope
        #[arg(long)]
        json: bool,

        /// Skip writing the trace file
        #[arg(long)]
        no_trace: bool,

        /// Let MCP server stderr through and log more
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow without executing it
    Validate {
        workflow: String,
    },

    /// Inspect available node types
    Nodes {
        #[command(subcommand)]
        action: NodesAction,
    },

    /// Manage the saved workflow library
    Workflows {
        #[command(subcommand)]
        action: WorkflowsAction,
    },

    /// Manage MCP servers
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },

    /// Manage execution traces
    Trace {
        #[command(subcommand)]
        action: TraceAction,
    },

    /// Run as an MCP server exposing workflow capability tools
    Serve,
}

#[derive(Subcommand)]
enum NodesAction {
    /// List node types
    List {
        /// Include filtered entries (test nodes, denied globs)
        #[arg(long)]
        all: bool,
    },
    /// Show one node type's interface
    Describe { type_id: String },
    /// Search node types by key or description
    Search { query: String },
}

#[derive(Subcommand)]
enum WorkflowsAction {
    /// List saved workflows
    List,
    /// Show a saved workflow's IR
    Describe { name: String },
    /// Save a workflow file into the library
    Save {
        file: PathBuf,
        /// Override the name to save under
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum McpAction {
    /// Add a stdio server to mcp-servers.json
    Add {
        name: String,
        command: String,
        args: Vec<String>,
        /// Environment entries as KEY=VALUE (supports ${VAR:-default})
        #[arg(short, long)]
        env: Vec<String>,
    },
    /// Remove a server
    Remove { name: String },
    /// List configured servers
    List,
    /// Discover tools and refresh the registry cache
    Sync {
        #[arg(short, long)]
        verbose: bool,
    },
    /// List tools a server advertises (spawns the server once)
    Tools { name: String },
    /// Show one server's configuration
    Info { name: String },
}

#[derive(Subcommand)]
enum TraceAction {
    /// List trace files, newest first
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print a trace document (by file-name fragment)
    Show { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Interrupted".yellow());
            std::process::exit(130);
        }
    });

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            ExitCode::from(1)
        }
    }
}

/// Shared startup: home, settings (env-merged), registry with cached
/// virtual entries, MCP discovery sync (cache hit spawns nothing).
async fn setup(sync_mcp: bool, verbose: bool) -> Result<(PflowHome, Settings, Registry), PflowError> {
    let home = PflowHome::resolve();
    let settings = Settings::load(&home)?.with_env();
    let mut registry = Registry::with_filter(settings.node_filters.clone());

    if sync_mcp {
        discovery::sync(
            &home.mcp_servers_path(),
            &home.registry_cache_path(),
            &mut registry,
            verbose,
        )
        .await?;
    } else {
        registry.load_cache(&home.registry_cache_path())?;
    }

    Ok((home, settings, registry))
}

async fn dispatch(cli: Cli) -> Result<ExitCode, PflowError> {
    match cli.command {
        Commands::Run {
            workflow,
            params,
            json,
            no_trace,
            verbose,
        } => {
            let (home, settings, registry) = setup(true, verbose).await?;
            let ir = workflows::resolve_source(&home, &workflow)?;
            let inputs = parse_params(&params)?;

            let report = run_workflow(
                ir,
                &registry,
                &home,
                &settings,
                RunOptions {
                    inputs,
                    planner_cache: None,
                    trace_enabled: !no_trace,
                    verbose,
                    llm: None,
                },
            )
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report.to_json())?);
            } else {
                print_report_text(&report);
            }
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Commands::Validate { workflow } => {
            let (home, _settings, registry) = setup(false, false).await?;
            let ir = workflows::resolve_source(&home, &workflow)?;
            let name = ir.display_name().to_string();
            let node_count = ir.nodes.len();
            let edge_count = ir.edges.len();
            validate_workflow(ir, &registry)?;
            println!("{} Workflow '{}' is valid", "✓".green(), name);
            println!("  Nodes: {node_count}");
            println!("  Edges: {edge_count}");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Nodes { action } => {
            let (_home, _settings, registry) = setup(false, false).await?;
            handle_nodes(&registry, action)
        }

        Commands::Workflows { action } => {
            let (home, _settings, _registry) = setup(false, false).await?;
            handle_workflows(&home, action)
        }

        Commands::Mcp { action } => handle_mcp(action).await,

        Commands::Trace { action } => {
            let (home, _settings, _registry) = setup(false, false).await?;
            handle_trace(&home, action)
        }

        Commands::Serve => {
            let (home, settings, registry) = setup(true, false).await?;
            let server = pflow::mcp::serve::CapabilityServer::new(home, settings, registry);
            server.serve_stdio().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Parse `key=value` params; values parse as JSON first, falling back to
/// plain strings so `names=["a","b"]` and `url=https://x` both work.
fn parse_params(params: &[String]) -> Result<ValueMap, PflowError> {
    let mut inputs = ValueMap::new();
    for raw in params {
        let (key, value) = raw.split_once('=').ok_or_else(|| PflowError::ConfigError {
            reason: format!("params must be key=value, got '{raw}'"),
        })?;
        let parsed = serde_json::from_str::<serde_json::Value>(value)
            .map(Value::from)
            .unwrap_or_else(|_| Value::Str(value.to_string()));
        inputs.insert(key.to_string(), parsed);
    }
    Ok(inputs)
}

fn print_report_text(report: &pflow::ExecutionReport) {
    for (id, state) in &report.nodes {
        let (symbol, colored_status) = match state.status {
            pflow::NodeStatus::Completed => ("✓".green(), "completed".green()),
            pflow::NodeStatus::Failed => ("✗".red(), "failed".red()),
            pflow::NodeStatus::NotExecuted => ("-".dimmed(), "not executed".dimmed()),
        };
        println!(
            "  {} {} {} {}",
            symbol,
            id,
            colored_status,
            format!("({}ms)", state.duration_ms).dimmed()
        );
    }

    if let Some(error) = &report.error {
        eprintln!("\n{} {}", "Error:".red().bold(), error.message);
        if let Some(suggestion) = &error.suggestion {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        return;
    }

    if !report.outputs.is_empty() {
        println!("\n{}", "Outputs:".cyan().bold());
        for (name, value) in &report.outputs {
            println!("  {name} = {value}");
        }
    }
    if let Some(path) = &report.trace_path {
        println!("{} {}", "Trace:".dimmed(), path.display().to_string().dimmed());
    }
}

fn handle_nodes(registry: &Registry, action: NodesAction) -> Result<ExitCode, PflowError> {
    match action {
        NodesAction::List { all } => {
            for entry in registry.load(all) {
                println!(
                    "{:<36} {}",
                    entry.key.cyan(),
                    entry.interface.description
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        NodesAction::Describe { type_id } => {
            let entry = registry
                .get_unfiltered(&type_id)
                .ok_or_else(|| PflowError::RegistryMiss {
                    type_id: type_id.clone(),
                    suggestions: registry.suggest(&type_id),
                })?;
            println!("{}", serde_json::to_string_pretty(entry)?);
            Ok(ExitCode::SUCCESS)
        }
        NodesAction::Search { query } => {
            for entry in registry.search(&query) {
                println!(
                    "{:<36} {}",
                    entry.key.cyan(),
                    entry.interface.description
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn handle_workflows(home: &PflowHome, action: WorkflowsAction) -> Result<ExitCode, PflowError> {
    match action {
        WorkflowsAction::List => {
            let infos = workflows::list(home)?;
            if infos.is_empty() {
                println!("No saved workflows");
            }
            for info in infos {
                println!(
                    "{:<24} {:>3} nodes  {}",
                    info.name.cyan(),
                    info.node_count,
                    info.description.unwrap_or_default().dimmed()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        WorkflowsAction::Describe { name } => {
            let ir = workflows::load(home, &name)?;
            println!("{}", ir.to_json_string()?);
            Ok(ExitCode::SUCCESS)
        }
        WorkflowsAction::Save { file, name } => {
            let ir = pflow::WorkflowIr::from_file(&file)?;
            let path = workflows::save(home, &ir, name.as_deref())?;
            println!("{} Saved to {}", "✓".green(), path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn handle_mcp(action: McpAction) -> Result<ExitCode, PflowError> {
    let home = PflowHome::resolve();
    let config_path = home.mcp_servers_path();

    match action {
        McpAction::Add {
            name,
            command,
            args,
            env,
        } => {
            let mut config = McpServersFile::load(&config_path)?;
            let env = env
                .iter()
                .map(|raw| {
                    raw.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .ok_or_else(|| PflowError::ConfigError {
                            reason: format!("env entries must be KEY=VALUE, got '{raw}'"),
                        })
                })
                .collect::<Result<_, _>>()?;
            config.add(
                name.clone(),
                ServerDef::Stdio {
                    command,
                    args,
                    env,
                    transport: Some("stdio".to_string()),
                },
            );
            config.save(&config_path)?;
            println!("{} Added server '{}'; run `pflow mcp sync`", "✓".green(), name);
            Ok(ExitCode::SUCCESS)
        }
        McpAction::Remove { name } => {
            let mut config = McpServersFile::load(&config_path)?;
            if config.remove(&name).is_none() {
                return Err(PflowError::McpNotConfigured { name });
            }
            config.save(&config_path)?;
            println!("{} Removed server '{}'", "✓".green(), name);
            Ok(ExitCode::SUCCESS)
        }
        McpAction::List => {
            let config = McpServersFile::load(&config_path)?;
            if config.servers.is_empty() {
                println!("No MCP servers configured");
            }
            for (name, def) in &config.servers {
                match def {
                    ServerDef::Stdio { command, args, .. } => {
                        println!("{:<20} {} {}", name.cyan(), command, args.join(" "))
                    }
                    ServerDef::Http { url, .. } => {
                        println!("{:<20} {}", name.cyan(), url)
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        McpAction::Sync { verbose } => {
            let settings = Settings::load(&home)?.with_env();
            let mut registry = Registry::with_filter(settings.node_filters);
            let report = discovery::sync(
                &config_path,
                &home.registry_cache_path(),
                &mut registry,
                verbose,
            )
            .await?;
            if report.cache_hit {
                println!(
                    "{} Cache hit: {} tools across {} servers",
                    "✓".green(),
                    report.tools_registered,
                    report.servers
                );
            } else {
                println!(
                    "{} Discovered {} tools across {} servers",
                    "✓".green(),
                    report.tools_registered,
                    report.servers
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        McpAction::Tools { name } => {
            let config = McpServersFile::load(&config_path)?;
            let runtime = pflow::McpRuntime::new(config, false);
            let tools = runtime.list_tools(&name).await?;
            for tool in tools {
                println!(
                    "{:<32} {}",
                    tool.name.cyan(),
                    tool.description.unwrap_or_default()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        McpAction::Info { name } => {
            let config = McpServersFile::load(&config_path)?;
            let def = config
                .get(&name)
                .ok_or_else(|| PflowError::McpNotConfigured { name: name.clone() })?;
            println!("{}", serde_json::to_string_pretty(def)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn handle_trace(home: &PflowHome, action: TraceAction) -> Result<ExitCode, PflowError> {
    match action {
        TraceAction::List { limit } => {
            let traces = list_traces(&home.debug_dir())?;
            let traces: Vec<_> = match limit {
                Some(n) => traces.into_iter().take(n).collect(),
                None => traces,
            };
            println!("{:<60} {:>10}", "TRACE", "SIZE");
            for trace in traces {
                let size = if trace.size_bytes > 1024 * 1024 {
                    format!("{:.1}MB", trace.size_bytes as f64 / 1024.0 / 1024.0)
                } else if trace.size_bytes > 1024 {
                    format!("{:.1}KB", trace.size_bytes as f64 / 1024.0)
                } else {
                    format!("{}B", trace.size_bytes)
                };
                println!("{:<60} {:>10}", trace.file_name, size);
            }
            Ok(ExitCode::SUCCESS)
        }
        TraceAction::Show { id } => {
            let traces = list_traces(&home.debug_dir())?;
            let trace = traces
                .iter()
                .find(|t| t.file_name.contains(&id))
                .ok_or_else(|| PflowError::ConfigError {
                    reason: format!("no trace matching '{id}'"),
                })?;
            println!("{}", std::fs::read_to_string(&trace.path)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
