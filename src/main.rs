//! ClusterMap - Cluster Membership Map
//!
//! Command line tool for inspecting and administering the cluster map
//! persisted on a node.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clustermap::config::ClusterMapConfig;
use clustermap::error::{Error, Result};
use clustermap::node::{Node, NodeFlag, NodeFlags, NodeRole};
use clustermap::rebalance::RmdOwner;
use clustermap::smap::{actions, ActionMsg, ModifyIntent, SmapModifier, SmapOwner};

/// ClusterMap - Cluster Membership Map
#[derive(Parser)]
#[command(name = "clustermap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "clustermap.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Proxy,
    Target,
}

impl From<RoleArg> for NodeRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Proxy => NodeRole::Proxy,
            RoleArg::Target => NodeRole::Target,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "clustermap.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "p-1")]
        node_id: String,

        /// Node role
        #[arg(long, value_enum, default_value = "proxy")]
        role: RoleArg,
    },

    /// Validate configuration file
    Validate,

    /// Print the persisted cluster map
    Show {
        /// Print the full node list
        #[arg(long)]
        verbose: bool,
    },

    /// Create a new cluster with this node as primary
    Bootstrap,

    /// Add a node to the persisted cluster map
    Join {
        /// Node ID
        id: String,

        #[arg(long, value_enum)]
        role: RoleArg,

        #[arg(long)]
        hostname: String,

        #[arg(long)]
        port: u16,

        /// Do not rebalance after adding a target
        #[arg(long)]
        no_rebalance: bool,
    },

    /// Remove a node from the persisted cluster map
    Remove {
        id: String,

        #[arg(long, value_enum)]
        role: RoleArg,
    },

    /// Put a node in maintenance, or take it out with --stop
    Maintenance {
        id: String,

        #[arg(long)]
        stop: bool,
    },

    /// Make another proxy the primary
    SetPrimary { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { output, node_id, role } = &cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
        return run_init(output, node_id, (*role).into());
    }

    let config = match ClusterMapConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ Failed to load configuration from {:?}: {}", cli.config, e);
            return Err(e);
        }
    };
    init_logging(
        cli.log_level.as_deref().unwrap_or(&config.logging.level),
        &config.logging.format,
    );

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Validate => run_validate(&config),
        Commands::Show { verbose } => run_show(&config, verbose),
        Commands::Bootstrap => run_bootstrap(&config).await,
        Commands::Join {
            id,
            role,
            hostname,
            port,
            no_rebalance,
        } => {
            let node = Node::new(id, role.into(), &hostname, port);
            run_join(&config, node, no_rebalance).await
        }
        Commands::Remove { id, role } => {
            let msg = ActionMsg::new(actions::REMOVE_NODE, id.clone());
            let intent = ModifyIntent::RemoveNode {
                role: role.into(),
                id,
            };
            run_modify(&config, SmapModifier::new(msg, intent)).await
        }
        Commands::Maintenance { id, stop } => {
            let flags = NodeFlags::of(NodeFlag::Maintenance);
            let (action, intent) = if stop {
                (
                    actions::STOP_MAINTENANCE,
                    ModifyIntent::ClearFlags { id: id.clone(), flags },
                )
            } else {
                (
                    actions::START_MAINTENANCE,
                    ModifyIntent::SetFlags { id: id.clone(), flags },
                )
            };
            run_modify(&config, SmapModifier::new(ActionMsg::new(action, id), intent)).await
        }
        Commands::SetPrimary { id } => {
            let msg = ActionMsg::new(actions::SET_PRIMARY, id.clone());
            run_modify(&config, SmapModifier::new(msg, ModifyIntent::SetPrimary { id })).await
        }
    }
}

fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Generate a configuration file
fn run_init(output: &Path, node_id: &str, role: NodeRole) -> Result<()> {
    let role = match role {
        NodeRole::Proxy => "proxy",
        NodeRole::Target => "target",
    };
    let config_content = format!(
        r#"# ClusterMap Configuration
# Generated configuration file

[node]
id = "{node_id}"
role = "{role}"
hostname = "localhost"
port = 51080
config_dir = "/var/lib/clustermap/{node_id}"

[persistence]
compression = false
checksum = true
fsync = true

[notifications]
queue_size = 8

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(output, config_content)?;
    println!("✓ Configuration written to {}", output.display());
    Ok(())
}

fn run_validate(config: &ClusterMapConfig) -> Result<()> {
    println!("✓ Configuration is valid");
    println!("  Node:           {}", config.local_node().string_ex());
    println!("  Cluster Map:    {}", config.smap_path().display());
    println!("  Compression:    {}", config.persistence.compression);
    println!("  Checksum:       {}", config.persistence.checksum);
    Ok(())
}

fn run_show(config: &ClusterMapConfig, verbose: bool) -> Result<()> {
    let owner = SmapOwner::new(config);
    match owner.load()? {
        Some(smap) if verbose => println!("{}", smap.pp()),
        Some(smap) => {
            println!("{}", smap.string_ex());
            println!("  Primary:        {}", smap.primary_id().unwrap_or("-"));
            println!("  IC:             {:?}", smap.ic_members());
            println!("  Active targets: {}", smap.count_active_targets());
        }
        None => println!("No cluster map at {}", owner.path().display()),
    }
    Ok(())
}

async fn run_bootstrap(config: &ClusterMapConfig) -> Result<()> {
    let owner = SmapOwner::open(config)?;
    let current = owner.current();
    if current.version() > 0 {
        return Err(Error::Config(format!(
            "{} already exists at {}",
            current,
            owner.path().display()
        )));
    }

    let me = config.local_node();
    if !me.is_proxy() {
        return Err(Error::Config(format!("{} cannot be primary", me)));
    }

    let msg = ActionMsg::new(actions::BOOTSTRAP, me.id.clone());
    let mut ctx = SmapModifier::new(msg, ModifyIntent::None).with_pre(move |_, clone| {
        clone.init_identity();
        let id = me.id.clone();
        clone.put_node(me, NodeFlags::NONE);
        clone.set_primary(&id);
        clone.staff_ic();
        Ok(())
    });
    let smap = owner.modify(&mut ctx).await?;
    tracing::info!("bootstrapped {}", smap);
    println!("{}", smap.pp());
    Ok(())
}

async fn run_join(config: &ClusterMapConfig, node: Node, no_rebalance: bool) -> Result<()> {
    let msg = ActionMsg::new(actions::JOIN, node.id.clone());
    let mut ctx = SmapModifier::new(
        msg,
        ModifyIntent::AddNode {
            node,
            flags: NodeFlags::NONE,
        },
    );
    if no_rebalance {
        ctx = ctx.skip_rebalance();
    }
    run_modify(config, ctx).await
}

/// Commit one change to the persisted map, rebalancing if it calls for it
async fn run_modify(config: &ClusterMapConfig, ctx: SmapModifier) -> Result<()> {
    let owner = SmapOwner::open(config)?;
    if owner.current().primary().is_none() {
        return Err(Error::Config(format!(
            "no cluster at {}; run bootstrap first",
            owner.path().display()
        )));
    }

    let trigger = Arc::new(RmdOwner::new());
    let mut ctx = ctx.with_final(move |ctx, smap| {
        if let Err(e) = ctx.rebalance_if_needed(smap, trigger.as_ref(), None) {
            tracing::warn!("{}: rebalance not started: {}", ctx.msg, e);
        }
    });

    let smap = owner.modify(&mut ctx).await?;
    println!("✓ {}: {}", ctx.msg, smap);
    if let Some(md) = ctx.rmd.as_ref() {
        println!("  Rebalance:      v{} over {:?}", md.version, md.target_ids);
    }
    Ok(())
}
