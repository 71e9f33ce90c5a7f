use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use prism_ctl::CtlConfig;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "prism-ctl")]
#[command(about = "Prism control-plane adapter for cluster topology changes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "prism-ctl.toml", env = "PRISM_CTL_CONFIG")]
    config: String,

    /// Control server address (defaults to rpc.bind_addr from the config)
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control-plane adapter
    Serve,

    /// List tasks
    Tasks {
        /// Wait until the task list moves past this revision
        #[arg(long)]
        rev: Option<String>,
    },

    /// Show the cluster topology
    Topology {
        /// Wait until the topology moves past this revision
        #[arg(long)]
        rev: Option<String>,
    },

    /// Prepare a topology change
    Prepare(ChangeArgs),

    /// Start a prepared topology change
    Start(ChangeArgs),

    /// Cancel a task
    Cancel {
        /// Task id, e.g. rebalance:<change id>
        task_id: String,

        /// Only cancel if the task is still at this revision
        #[arg(long)]
        rev: Option<String>,
    },

    /// Stop a running adapter
    Shutdown,
}

#[derive(Args, Debug)]
pub struct ChangeArgs {
    /// Topology change id
    pub id: String,

    /// Node kept after the change (repeatable)
    #[arg(long = "node", required = true)]
    pub nodes: Vec<String>,

    /// Hard failover instead of rebalance
    #[arg(long)]
    pub failover: bool,

    /// Skip the topology revision check
    #[arg(long)]
    pub force: bool,
}

/// Load the config file if present, defaults otherwise
fn load_config(path: &Path, create: bool) -> Result<CtlConfig> {
    if create {
        CtlConfig::load_or_create(path)
    } else if path.exists() {
        CtlConfig::load(path)
    } else {
        Ok(CtlConfig::default())
    }
}

fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    match format {
        "json" => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        _ => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let serving = matches!(cli.command, Commands::Serve);

    let config = load_config(Path::new(&cli.config), serving)?;
    if serving {
        init_logging(&config.logging.level, &config.logging.format);
    } else {
        // Admin commands print tables; keep the log quiet
        init_logging("warn", "pretty");
    }

    let addr = cli.addr.unwrap_or_else(|| config.rpc.bind_addr.clone());
    let timeout = config.rpc.request_timeout();

    match cli.command {
        Commands::Serve => commands::run_serve(config).await,
        Commands::Tasks { rev } => commands::run_tasks(&addr, timeout, rev).await,
        Commands::Topology { rev } => commands::run_topology(&addr, timeout, rev).await,
        Commands::Prepare(args) => commands::run_prepare(&addr, timeout, args).await,
        Commands::Start(args) => commands::run_start(&addr, timeout, args).await,
        Commands::Cancel { task_id, rev } => {
            commands::run_cancel(&addr, timeout, &task_id, rev).await
        }
        Commands::Shutdown => commands::run_shutdown(&addr, timeout).await,
    }
}
