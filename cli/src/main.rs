use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tv_core::dispatcher::{CmdResult, Command, CommandDispatcher, VersionRef};
use tv_core::storage::GraphStorage;
use tv_core::types::{NodeId, TreeId, VersionId};

use storage_file::json_storage::JsonStorage;

mod config;

#[derive(Parser)]
#[command(name = "tv")]
#[command(about = "Versioned graph store CLI", long_about = None)]
struct Cli {
    /// Каталог хранилища
    #[arg(long, global = true, env = "TREEVER_DIR", default_value = ".treever")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Init,
    /// Создать дерево
    Tree { name: String },
    Trees,
    /// Удалить дерево со всеми версиями и тегами
    Purge { tree: u64 },

    /// Создать ноду в живом графе
    Node {
        #[arg(short, long)]
        tree: u64,
        #[arg(short, long, default_value = "{}")]
        data: String,
    },
    SetNode {
        node: u64,
        #[arg(short, long)]
        data: String,
    },
    /// Создать ребро incoming -> outgoing в живом графе
    Edge {
        #[arg(short, long)]
        tree: u64,
        incoming: u64,
        outgoing: u64,
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Пометить тегом снимок живого графа (или существующую версию)
    Tag {
        #[arg(short, long)]
        tree: u64,
        name: String,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long)]
        version: Option<u64>,
    },
    /// Ответвить новую версию от тега
    Branch {
        #[arg(short, long)]
        tree: u64,
        from: String,
        /// Сразу пометить ветку тегом
        #[arg(long)]
        tag: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    AddNode {
        version: VersionRef,
        /// Записать существующую ноду вместо создания новой
        #[arg(long)]
        node: Option<u64>,
        #[arg(short, long, default_value = "{}")]
        data: String,
    },
    AddEdge {
        version: VersionRef,
        incoming: u64,
        outgoing: u64,
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Теги дерева
    Tags {
        #[arg(short, long)]
        tree: u64,
    },
    Restore {
        #[arg(short, long)]
        tree: u64,
        tag: String,
    },
    Fetch { tag: String },
    Log {
        #[arg(short, long)]
        tree: u64,
    },
    Lineage { version: VersionRef },

    Roots { version: VersionRef },
    Show { version: VersionRef, node: u64 },
    Children { version: VersionRef, node: u64 },
    Parents { version: VersionRef, node: u64 },
    Edges { version: VersionRef, node: u64 },
    Depth { version: VersionRef, depth: usize },
    Path { version: VersionRef, from: u64, to: u64 },
    Walk { version: VersionRef },
}

fn parse_data(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Data is not valid JSON: {}", raw))
}

fn open_store(dir: &Path) -> Result<CommandDispatcher> {
    if !dir.exists() {
        anyhow::bail!("Store not found at {} (run `tv init`)", dir.display());
    }
    let config = config::load(dir)?;
    let storage = storage_file::open_dir(dir).context("Failed to open graph storage")?;
    let storage: Arc<dyn GraphStorage> = Arc::new(storage);
    tracing::debug!(store = %dir.display(), ?config, "store opened");
    Ok(CommandDispatcher::new(storage, config))
}

fn into_command(command: Commands) -> Result<Command> {
    Ok(match command {
        Commands::Init => anyhow::bail!("init does not run against an open store"),
        Commands::Tree { name } => Command::CreateTree { name },
        Commands::Trees => Command::Trees,
        Commands::Purge { tree } => Command::Purge { tree: TreeId(tree) },

        Commands::Node { tree, data } => {
            Command::CreateNode { tree: TreeId(tree), data: parse_data(&data)? }
        }
        Commands::SetNode { node, data } => {
            Command::SetNode { node: NodeId(node), data: parse_data(&data)? }
        }
        Commands::Edge { tree, incoming, outgoing, data } => Command::CreateEdge {
            tree: TreeId(tree),
            incoming: NodeId(incoming),
            outgoing: NodeId(outgoing),
            data: parse_data(&data)?,
        },

        Commands::Tag { tree, name, message, version } => Command::Tag {
            tree: TreeId(tree),
            name,
            description: message,
            version: version.map(VersionId),
        },
        Commands::Branch { tree, from, tag, message } => Command::Branch {
            tree: TreeId(tree),
            from_tag: from,
            tag,
            description: message,
        },
        Commands::AddNode { version, node, data } => Command::AddNode {
            version,
            node: node.map(NodeId),
            data: parse_data(&data)?,
        },
        Commands::AddEdge { version, incoming, outgoing, data } => Command::AddEdge {
            version,
            incoming: NodeId(incoming),
            outgoing: NodeId(outgoing),
            data: parse_data(&data)?,
        },

        Commands::Tags { tree } => Command::Tags { tree: TreeId(tree) },
        Commands::Restore { tree, tag } => Command::Restore { tree: TreeId(tree), tag },
        Commands::Fetch { tag } => Command::Fetch { tag },
        Commands::Log { tree } => Command::Log { tree: TreeId(tree) },
        Commands::Lineage { version } => Command::Lineage { version },

        Commands::Roots { version } => Command::Roots { version },
        Commands::Show { version, node } => Command::Node { version, node: NodeId(node) },
        Commands::Children { version, node } => Command::Children { version, node: NodeId(node) },
        Commands::Parents { version, node } => Command::Parents { version, node: NodeId(node) },
        Commands::Edges { version, node } => Command::Edges { version, node: NodeId(node) },
        Commands::Depth { version, depth } => Command::Depth { version, depth },
        Commands::Path { version, from, to } => {
            Command::Path { version, from: NodeId(from), to: NodeId(to) }
        }
        Commands::Walk { version } => Command::Walk { version },
    })
}

fn init(dir: &Path) -> Result<()> {
    if dir.join(storage_file::GRAPH_FILE).exists() {
        println!("Store already exists");
        return Ok(());
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    JsonStorage::new(dir.join(storage_file::GRAPH_FILE)).context("Failed to create graph storage")?;
    config::write_default(dir)?;
    println!("Initialized empty store in {}", dir.display());
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        return init(&cli.store);
    }

    let dispatcher = open_store(&cli.store)?;
    match dispatcher.dispatch(into_command(cli.command)?)? {
        CmdResult::Success(message) => println!("{}", message),
        CmdResult::Output(text) if text.ends_with('\n') => print!("{}", text),
        CmdResult::Output(text) => println!("{}", text),
        CmdResult::None => {}
    }
    Ok(())
}
