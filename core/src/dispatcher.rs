use std::collections::HashSet;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph_store::GraphStore;
use crate::storage::GraphStorage;
use crate::traversal::TraversalEngine;
use crate::types::{EdgeVersion, NodeId, NodeVersion, TreeId, VersionId};
use crate::version_manager::VersionManager;

/// Результат выполнения команды
#[derive(Debug, PartialEq)]
pub enum CmdResult {
    Success(String),
    Output(String),
    None,
}

/// Ссылка на версию: числовой id или имя тега.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    Id(VersionId),
    Tag(String),
}

impl FromStr for VersionRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<u64>() {
            Ok(id) => VersionRef::Id(VersionId(id)),
            Err(_) => VersionRef::Tag(s.to_string()),
        })
    }
}

/// Абстракция команды (DTO)
#[derive(Debug, Clone)]
pub enum Command {
    CreateTree { name: String },
    Trees,
    Purge { tree: TreeId },

    CreateNode { tree: TreeId, data: Value },
    SetNode { node: NodeId, data: Value },
    CreateEdge { tree: TreeId, incoming: NodeId, outgoing: NodeId, data: Value },

    Tag {
        tree: TreeId,
        name: String,
        description: Option<String>,
        // без версии тегируется снимок живого состояния
        version: Option<VersionId>,
    },
    Branch {
        tree: TreeId,
        from_tag: String,
        tag: Option<String>,
        description: Option<String>,
    },
    AddNode { version: VersionRef, node: Option<NodeId>, data: Value },
    AddEdge { version: VersionRef, incoming: NodeId, outgoing: NodeId, data: Value },

    Tags { tree: TreeId },
    Restore { tree: TreeId, tag: String },
    Fetch { tag: String },
    Log { tree: TreeId },
    Lineage { version: VersionRef },

    Roots { version: VersionRef },
    Node { version: VersionRef, node: NodeId },
    Children { version: VersionRef, node: NodeId },
    Parents { version: VersionRef, node: NodeId },
    Edges { version: VersionRef, node: NodeId },
    Depth { version: VersionRef, depth: usize },
    Path { version: VersionRef, from: NodeId, to: NodeId },
    Walk { version: VersionRef },
}

pub struct CommandDispatcher {
    graph: GraphStore,
    versions: VersionManager,
}

impl CommandDispatcher {
    pub fn new(storage: Arc<dyn GraphStorage>, config: EngineConfig) -> Self {
        Self {
            graph: GraphStore::new(storage.clone()),
            versions: VersionManager::new(storage, config),
        }
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    fn resolve(&self, version: &VersionRef) -> Result<VersionId> {
        match version {
            VersionRef::Id(id) => Ok(self.versions.version(*id)?.id),
            VersionRef::Tag(name) => Ok(self.versions.fetch_by_tag(name)?.id),
        }
    }

    fn open(&self, version: &VersionRef) -> Result<TraversalEngine> {
        let id = self.resolve(version)?;
        self.versions.open(id)
    }

    pub fn dispatch(&self, cmd: Command) -> Result<CmdResult> {
        match cmd {
            Command::CreateTree { name } => {
                let tree = self.graph.create_tree(name)?;
                Ok(CmdResult::Success(format!("Tree created: {}", tree.id)))
            }

            Command::Trees => {
                let mut output = String::new();
                for tree in self.graph.trees()? {
                    let _ = writeln!(output, "{}\t{}", tree.id, tree.name);
                }
                Ok(non_empty(output, "No trees."))
            }

            Command::Purge { tree } => {
                let r = self.graph.purge_tree(tree)?;
                Ok(CmdResult::Success(format!(
                    "Tree {} purged: {} nodes, {} edges, {} versions, {} tags",
                    tree, r.nodes, r.edges, r.versions, r.tags
                )))
            }

            Command::CreateNode { tree, data } => {
                let node = self.graph.create_node(tree, data)?;
                Ok(CmdResult::Success(format!("Node created: {}", node.id)))
            }

            Command::SetNode { node, data } => {
                self.graph.set_node_data(node, data)?;
                Ok(CmdResult::Success(format!("Node updated: {}", node)))
            }

            Command::CreateEdge { tree, incoming, outgoing, data } => {
                let edge = self.graph.create_edge(tree, incoming, outgoing, data)?;
                Ok(CmdResult::Success(format!("Edge created: {}", edge.id)))
            }

            Command::Tag { tree, name, description, version } => {
                let tag = match version {
                    Some(v) => self.versions.create_tag_for_version(tree, &name, description, v)?,
                    None => self.versions.create_tag_for_live_state(tree, &name, description)?,
                };
                Ok(CmdResult::Success(format!("Tag '{}' -> version {}", tag.name, tag.version_id)))
            }

            Command::Branch { tree, from_tag, tag, description } => {
                let version = match tag {
                    Some(name) => {
                        self.versions.branch_and_tag(tree, &from_tag, &name, description)?.0
                    }
                    None => self.versions.branch_from_tag(tree, &from_tag)?,
                };
                Ok(CmdResult::Success(format!("Version created: {}", version.id)))
            }

            Command::AddNode { version, node, data } => {
                let id = self.resolve(&version)?;
                let entry = match node {
                    Some(existing) => self.versions.add_existing_node(id, existing, data)?,
                    None => self.versions.add_node(id, data)?,
                };
                Ok(CmdResult::Success(format!("Node {} added to version {}", entry.node_id, id)))
            }

            Command::AddEdge { version, incoming, outgoing, data } => {
                let id = self.resolve(&version)?;
                let entry = self.versions.add_edge(id, incoming, outgoing, data)?;
                Ok(CmdResult::Success(format!("Edge {} added to version {}", entry.edge_id, id)))
            }

            Command::Tags { tree } => {
                let mut output = String::new();
                for tag in self.versions.tags().tags(tree)? {
                    let _ = write!(output, "{}\t{}", tag.name, tag.version_id);
                    if let Some(description) = tag.description {
                        let _ = write!(output, "\t{}", description);
                    }
                    output.push('\n');
                }
                Ok(non_empty(output, "No tags."))
            }

            Command::Restore { tree, tag } => {
                let version = self.versions.restore_from_tag(tree, &tag)?;
                Ok(CmdResult::Output(format!("{}", version.id)))
            }

            Command::Fetch { tag } => {
                let version = self.versions.fetch_by_tag(&tag)?;
                Ok(CmdResult::Output(format!("{}", version.id)))
            }

            Command::Log { tree } => {
                let mut output = String::new();
                for version in self.versions.versions(tree)? {
                    let tag = self.versions.tag_of(version.id)?;
                    let _ = writeln!(output, "Version: {}", version.id);
                    if let Some(parent) = version.parent_version_id {
                        let _ = writeln!(output, "Parent: {}", parent);
                    }
                    if let Some(tag) = tag {
                        let _ = writeln!(output, "Tag: {}", tag.name);
                        if let Some(description) = tag.description {
                            let _ = writeln!(output, "Description: {}", description);
                        }
                    }
                    let _ = writeln!(output, "Created: {}", version.created_at.to_rfc3339());
                    output.push_str("------------------------------\n");
                }
                Ok(non_empty(output, "History is empty."))
            }

            Command::Lineage { version } => {
                let id = self.resolve(&version)?;
                let chain: Vec<String> = self
                    .versions
                    .lineage(id)?
                    .iter()
                    .map(|v| v.id.to_string())
                    .collect();
                Ok(CmdResult::Output(chain.join(" <- ")))
            }

            Command::Roots { version } => {
                let engine = self.open(&version)?;
                Ok(render_nodes(&engine.root_nodes()))
            }

            Command::Node { version, node } => {
                let engine = self.open(&version)?;
                Ok(render_nodes(&[engine.node(node)?]))
            }

            Command::Children { version, node } => {
                let engine = self.open(&version)?;
                engine.node(node)?;
                Ok(render_nodes(&engine.child_nodes(node)))
            }

            Command::Parents { version, node } => {
                let engine = self.open(&version)?;
                engine.node(node)?;
                Ok(render_nodes(&engine.parent_nodes(node)))
            }

            Command::Edges { version, node } => {
                let engine = self.open(&version)?;
                engine.node(node)?;
                let mut output = String::new();
                for edge in engine.node_edges(node) {
                    let _ = writeln!(
                        output,
                        "{}\t{} -> {}\t{}",
                        edge.edge_id(),
                        edge.incoming_node_id,
                        edge.outgoing_node_id,
                        edge.entry.data
                    );
                }
                Ok(non_empty(output, ""))
            }

            Command::Depth { version, depth } => {
                let engine = self.open(&version)?;
                Ok(render_nodes(&engine.nodes_at_depth(depth)))
            }

            Command::Path { version, from, to } => {
                let engine = self.open(&version)?;
                match engine.find_path(from, to)? {
                    Some(path) => {
                        let nodes: Vec<String> =
                            path.iter().map(|s| s.node_id.to_string()).collect();
                        let edges: Vec<&EdgeVersion> =
                            path.iter().filter_map(|s| s.edge.map(|e| &e.entry)).collect();
                        let mut output = nodes.join(" -> ");
                        for edge in edges {
                            let _ = write!(output, "\n  via edge {}: {}", edge.edge_id, edge.data);
                        }
                        Ok(CmdResult::Output(output))
                    }
                    None => Ok(CmdResult::Output("No path.".into())),
                }
            }

            Command::Walk { version } => {
                let engine = self.open(&version)?;
                let mut visited = HashSet::new();
                let mut output = String::new();
                for root in engine.root_nodes() {
                    engine.traverse(root.node_id, &mut visited, |nv, via| {
                        let _ = match via {
                            Some(edge) => writeln!(
                                output,
                                "{}\t{}\t(from {})",
                                nv.node_id, nv.data, edge.incoming_node_id
                            ),
                            None => writeln!(output, "{}\t{}", nv.node_id, nv.data),
                        };
                    })?;
                }
                Ok(non_empty(output, ""))
            }
        }
    }
}

fn render_nodes(nodes: &[&NodeVersion]) -> CmdResult {
    let mut output = String::new();
    for nv in nodes {
        let _ = writeln!(output, "{}\t{}", nv.node_id, nv.data);
    }
    non_empty(output, "")
}

fn non_empty(output: String, empty: &str) -> CmdResult {
    match (output.is_empty(), empty.is_empty()) {
        (false, _) => CmdResult::Output(output),
        (true, false) => CmdResult::Output(empty.to_string()),
        (true, true) => CmdResult::None,
    }
}
