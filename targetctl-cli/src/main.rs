mod system_bus;
mod ui;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use targetctl_core::bus::Bus;
use targetctl_core::client::UnitClient;
use targetctl_core::config::{TargetctlConfig, ViewOptions};
use targetctl_core::fake::FakeManager;
use targetctl_core::model::{RelationKind, UnitAction};
use targetctl_core::tree::{ServiceNode, ServiceTree};

use system_bus::SystemBus;

#[derive(Parser, Debug)]
#[command(name = "targetctl", version)]
#[command(
    about = "An interactive systemd controller",
    long_about = "An interactive systemd controller.\nhttps://github.com/ibensw/targetctl"
)]
struct Cli {
    #[command(flatten)]
    view: ViewArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("relation").multiple(false)))]
struct ViewArgs {
    /// The systemd unit to observe; a bare name gets `.target` appended [default: -.slice]
    target: Option<String>,

    /// Enable recursive scanning
    #[arg(short = 't', long)]
    tree: bool,

    /// Explicit depth bound, overrides --tree
    #[arg(long, value_name = "N")]
    depth: Option<usize>,

    /// Show units that require the target (default)
    #[arg(short = 'r', long, group = "relation")]
    required_by: bool,

    /// Show units the target requires
    #[arg(short = 'R', long, group = "relation")]
    requires: bool,

    /// Show units that want the target
    #[arg(short = 'w', long, group = "relation")]
    wanted_by: bool,

    /// Show units the target wants
    #[arg(short = 'W', long, group = "relation")]
    wants: bool,

    /// Show units the target consists of
    #[arg(short = 'c', long, group = "relation")]
    consists_of: bool,

    /// Show units the target is part of
    #[arg(short = 'C', long, group = "relation")]
    part_of: bool,

    /// Refresh interval in milliseconds
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Configuration file (YAML)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Write logs here instead of the default temp file
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Use a built-in in-memory manager instead of the system bus
    #[arg(long, global = true)]
    demo: bool,
}

impl ViewArgs {
    fn relation(&self) -> Option<RelationKind> {
        [
            (self.required_by, RelationKind::RequiredBy),
            (self.requires, RelationKind::Requires),
            (self.wanted_by, RelationKind::WantedBy),
            (self.wants, RelationKind::Wants),
            (self.consists_of, RelationKind::ConsistsOf),
            (self.part_of, RelationKind::PartOf),
        ]
        .into_iter()
        .find_map(|(set, relation)| set.then_some(relation))
    }

    /// Layer the command line over the file configuration.
    fn apply(&self, config: &mut TargetctlConfig) {
        if let Some(target) = &self.target {
            config.target = Some(target.clone());
        }
        if self.tree {
            config.recursive = true;
            config.depth = None;
        }
        if let Some(depth) = self.depth {
            config.depth = Some(depth);
        }
        if let Some(relation) = self.relation() {
            config.relation = relation;
        }
        if let Some(interval) = self.interval_ms {
            config.refresh_interval_ms = interval;
            config.followup_delay_ms = config.followup_delay_ms.min(interval);
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the tree once and exit
    Tree {
        #[arg(long)]
        json: bool,
    },
    /// Start units
    Start {
        #[arg(required = true)]
        units: Vec<String>,
    },
    /// Stop units
    Stop {
        #[arg(required = true)]
        units: Vec<String>,
    },
    /// Restart units
    Restart {
        #[arg(required = true)]
        units: Vec<String>,
    },
    /// Reload units
    Reload {
        #[arg(required = true)]
        units: Vec<String>,
    },
}

/// Returns the file the configuration came from, if any.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Option<PathBuf>, TargetctlConfig)> {
    if let Some(path) = explicit {
        let config = TargetctlConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        return Ok((Some(path.to_path_buf()), config));
    }
    match TargetctlConfig::discover().context("failed to load config")? {
        Some((path, config)) => Ok((Some(path), config)),
        None => Ok((None, TargetctlConfig::default())),
    }
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn connect(demo: bool) -> anyhow::Result<Arc<dyn Bus>> {
    if demo {
        return Ok(Arc::new(FakeManager::demo()));
    }
    let bus = SystemBus::connect()
        .await
        .context("failed to connect to the system bus")?;
    Ok(Arc::new(bus))
}

fn print_node(node: &ServiceNode) {
    for node in node.iter() {
        println!("{}{} {}", "  ".repeat(node.depth), node.name, node.state);
    }
}

async fn run_actions(
    client: &UnitClient,
    action: UnitAction,
    units: &[String],
) -> anyhow::Result<()> {
    let mut failed = 0;
    for unit in units {
        match client.perform(action, unit).await {
            Ok(()) => info!(unit = %unit, %action, "action requested"),
            Err(e) => {
                error!(unit = %unit, %action, error = %e, "action failed");
                eprintln!("Error: {}", e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} units failed to {}", failed, units.len(), action);
    }
    Ok(())
}

async fn build_tree(client: UnitClient, options: &ViewOptions) -> anyhow::Result<ServiceTree> {
    ServiceTree::build(client, &options.target, options.relation, options.max_depth)
        .await
        .with_context(|| format!("failed to load the tree of {}", options.target))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config_path, mut config) = load_config(cli.view.config.as_deref())?;
    cli.view.apply(&mut config);
    config.validate().context("invalid options")?;
    let options = config.view_options();

    let log_path = cli
        .view
        .log_file
        .clone()
        .or_else(|| config.log_file.clone())
        .unwrap_or_else(|| std::env::temp_dir().join("targetctl.log"));
    init_logging(&log_path)?;
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded config");
    }
    info!(
        unit = %options.target,
        relation = %options.relation,
        depth = options.max_depth,
        "targetctl starting"
    );

    let bus = connect(cli.view.demo).await?;
    let client = UnitClient::new(bus);

    let action = match cli.command {
        Some(Commands::Tree { json }) => {
            let tree = build_tree(client, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree.snapshot())?);
            } else {
                print_node(tree.root());
            }
            return Ok(());
        }
        Some(Commands::Start { units }) => Some((UnitAction::Start, units)),
        Some(Commands::Stop { units }) => Some((UnitAction::Stop, units)),
        Some(Commands::Restart { units }) => Some((UnitAction::Restart, units)),
        Some(Commands::Reload { units }) => Some((UnitAction::Reload, units)),
        None => None,
    };
    if let Some((action, units)) = action {
        return run_actions(&client, action, &units).await;
    }

    let tree = build_tree(client, &options).await?;
    ui::run(tree, options.refresh).await
}
