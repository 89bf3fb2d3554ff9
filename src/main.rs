//! # kb-bridge CLI (`kbb`)
//!
//! The `kbb` binary drives the knowledge-base proxy and client. It can run
//! the proxy server, authenticate a session, browse the connected storage
//! provider, and create or synchronize knowledge bases.
//!
//! ## Usage
//!
//! ```bash
//! kbb --config ./config/kbb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbb serve` | Start the proxy HTTP server |
//! | `kbb login` | Authenticate and print the resolved session |
//! | `kbb ls [FOLDER_ID]` | List children of the root or of a folder |
//! | `kbb kb list` | List knowledge bases |
//! | `kbb kb create --resource <ID>...` | Create a knowledge base and trigger sync |
//! | `kbb kb sync <KB_ID>` | Re-trigger indexing |
//! | `kbb kb resources <KB_ID>` | List indexed resources under a path |
//! | `kbb kb update <KB_ID> --resource <ID>...` | Replace the source set |
//! | `kbb kb detach <KB_ID> --path <P>` | Detach one resource by path |
//! | `kbb browse` | Interactive picker workflow |
//!
//! Commands other than `serve` talk to the proxy's `/api` surface (the
//! `[proxy] base` setting), so a `kbb serve` instance must be running.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use kb_bridge::browse;
use kb_bridge::client::KbClient;
use kb_bridge::config::{self, Config};
use kb_bridge::models::SortKey;
use kb_bridge::picker::{filter_by_name, sort_nodes};
use kb_bridge::server;

/// kb-bridge — proxy and client for knowledge-base authoring over
/// cloud-storage connections.
#[derive(Parser)]
#[command(
    name = "kbb",
    about = "Proxy and client for knowledge-base authoring over cloud-storage connections",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults are used when the file
    /// does not exist.
    #[arg(long, global = true, default_value = "./config/kbb.toml")]
    config: PathBuf,

    /// Account email for authenticated commands.
    #[arg(long, global = true)]
    email: Option<String>,

    /// Account password for authenticated commands.
    #[arg(long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy HTTP server.
    ///
    /// Binds to `[server].bind` and relays `/api` requests to the upstream
    /// indexing service.
    Serve,

    /// Authenticate and print the resolved session.
    Login,

    /// List children of the connection root or of a folder.
    Ls {
        /// Folder resource id; omit for the connection root.
        folder: Option<String>,

        /// Filter by name (case-insensitive substring on the last path
        /// segment).
        #[arg(long)]
        find: Option<String>,

        /// Sort order: name_asc, name_desc, date_asc, date_desc.
        #[arg(long, default_value = "name_asc")]
        sort: String,
    },

    /// Knowledge-base operations.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Interactive picker workflow (stdin-driven).
    Browse,
}

#[derive(Subcommand)]
enum KbAction {
    /// List knowledge bases.
    List,

    /// Create a knowledge base from resource ids and trigger its sync.
    Create {
        /// Resource id to include (repeatable).
        #[arg(long = "resource", required = true)]
        resources: Vec<String>,
    },

    /// Re-trigger indexing for an existing knowledge base.
    Sync {
        /// Knowledge base id.
        kb_id: String,
    },

    /// List indexed resources under a path.
    Resources {
        /// Knowledge base id.
        kb_id: String,

        /// Resource path to list under.
        #[arg(long, default_value = "/")]
        path: String,
    },

    /// Replace the source resource id set of a knowledge base.
    Update {
        /// Knowledge base id.
        kb_id: String,

        /// Resource id to include (repeatable).
        #[arg(long = "resource", required = true)]
        resources: Vec<String>,
    },

    /// Detach a single resource from a knowledge base by its path.
    Detach {
        /// Knowledge base id.
        kb_id: String,

        /// Path of the resource to detach.
        #[arg(long)]
        path: String,
    },
}

impl Cli {
    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.email.as_deref(), self.password.as_deref()) {
            (Some(e), Some(p)) => Ok((e, p)),
            _ => bail!("--email and --password are required for this command"),
        }
    }
}

/// Builds a client and logs it in with the CLI credentials.
async fn authenticated_client(cli: &Cli, cfg: &Config) -> Result<KbClient> {
    let (email, password) = cli.credentials()?;
    let mut client = KbClient::new(cfg)?;
    client.login(email, password).await?;
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };

    match &cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Login => {
            let client = authenticated_client(&cli, &cfg).await?;
            let session = client.session();
            println!("Logged in.");
            println!("  organization: {}", session.org()?);
            println!("  connection:   {}", session.connection()?);
        }
        Commands::Ls { folder, find, sort } => {
            let sort_key: SortKey = sort.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let mut client = authenticated_client(&cli, &cfg).await?;
            let files = client.list_files(folder.as_deref()).await?;

            let mut nodes = filter_by_name(&files, find.as_deref().unwrap_or(""));
            sort_nodes(&mut nodes, sort_key);

            for f in nodes {
                let kind = if f.is_directory() { "d" } else { "-" };
                let status = f
                    .status
                    .map(|s| format!("{:?}", s).to_lowercase())
                    .unwrap_or_default();
                println!("{} {:<24} {:<40} {}", kind, f.resource_id, f.name(), status);
            }
        }
        Commands::Kb { action } => run_kb(&cli, &cfg, action).await?,
        Commands::Browse => {
            let (email, password) = cli.credentials()?;
            browse::run_browse(&cfg, email, password).await?;
        }
    }

    Ok(())
}

async fn run_kb(cli: &Cli, cfg: &Config, action: &KbAction) -> Result<()> {
    let mut client = authenticated_client(cli, cfg).await?;

    match action {
        KbAction::List => {
            let kbs = client.list_knowledge_bases().await?;
            if kbs.is_empty() {
                println!("No knowledge bases.");
            }
            for kb in kbs {
                println!(
                    "{:<40} {:<24} {} source(s)",
                    kb.knowledge_base_id,
                    kb.name.as_deref().unwrap_or("-"),
                    kb.connection_source_ids.len()
                );
            }
        }
        KbAction::Create { resources } => {
            let kb = client.create_knowledge_base(resources).await?;
            println!("Created knowledge base {}.", kb.knowledge_base_id);
            let outcome = client.sync_knowledge_base(&kb.knowledge_base_id).await?;
            match outcome.upsert_group_task_id {
                Some(task) => println!("Indexing started (task {}).", task),
                None => println!("Indexing triggered."),
            }
        }
        KbAction::Sync { kb_id } => {
            let outcome = client.sync_knowledge_base(kb_id).await?;
            match outcome.upsert_group_task_id {
                Some(task) => println!("Indexing started (task {}).", task),
                None => println!("Indexing triggered: {}", outcome.raw),
            }
        }
        KbAction::Resources { kb_id, path } => {
            let files = client.get_knowledge_base_resources(kb_id, path).await?;
            for f in files {
                let status = f
                    .status
                    .map(|s| format!("{:?}", s).to_lowercase())
                    .unwrap_or_default();
                println!("{:<10} {}", status, f.inode_path.path);
            }
        }
        KbAction::Update { kb_id, resources } => {
            let kb = client.update_knowledge_base(kb_id, resources).await?;
            println!(
                "Updated knowledge base {} ({} source(s)).",
                kb.knowledge_base_id,
                kb.connection_source_ids.len()
            );
        }
        KbAction::Detach { kb_id, path } => {
            client.detach_resource(kb_id, path).await?;
            println!("Detached {} from {}.", path, kb_id);
        }
    }

    Ok(())
}
