//! Таблицы графа и проверка пачек записей.
//!
//! `GraphState` не знает ничего о блокировках и файлах: его разделяют
//! `MemoryStorage` и файловые хранилища. Коммит проходит в две фазы:
//! `check` проверяет всю пачку против текущих таблиц и ранее staged записей,
//! `apply` вставляет без ошибок. Поэтому неудачная пачка не оставляет следов.

use std::collections::{BTreeMap, HashMap, HashSet};
use serde::{Serialize, Deserialize};

use crate::storage::{Constraint, RecordKey, Result, StorageError, Write};
use crate::types::{
    Edge, EdgeId, EdgeVersion, FrozenEdge, FrozenVersion, LiveGraph, Node, NodeId, NodeVersion,
    PurgeReport, Tag, TagId, Tree, TreeId, Version, VersionId,
};

#[derive(Debug, Clone, Default)]
struct Entries {
    nodes: Vec<NodeVersion>,
    edges: Vec<EdgeVersion>,
    node_ids: HashSet<NodeId>,
    edge_ids: HashSet<EdgeId>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphState {
    trees: BTreeMap<TreeId, Tree>,
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    versions: BTreeMap<VersionId, Version>,
    entries: HashMap<VersionId, Entries>,
    tags: BTreeMap<TagId, Tag>,
    tag_names: HashMap<String, TagId>,
    tagged: HashMap<VersionId, TagId>,
    entry_ids: HashSet<u64>,
}

/// Плоское сериализуемое представление таблиц.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDump {
    pub next_id: u64,
    pub trees: Vec<Tree>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub versions: Vec<Version>,
    pub node_versions: Vec<NodeVersion>,
    pub edge_versions: Vec<EdgeVersion>,
    pub tags: Vec<Tag>,
}

/// Записи, уже встреченные в проверяемой пачке.
#[derive(Default)]
struct Pending<'a> {
    ids: HashSet<u64>,
    trees: HashSet<TreeId>,
    nodes: HashMap<NodeId, TreeId>,
    edges: HashMap<EdgeId, NodeId>,
    versions: HashMap<VersionId, TreeId>,
    node_entries: HashSet<(NodeId, VersionId)>,
    edge_entries: HashSet<(EdgeId, VersionId)>,
    tag_names: HashSet<&'a str>,
    tagged: HashSet<VersionId>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Восстанавливает таблицы из дампа, прогоняя записи через обычную проверку.
    pub fn from_dump(dump: GraphDump) -> Result<(Self, u64)> {
        let mut writes = Vec::new();
        writes.extend(dump.trees.into_iter().map(Write::Tree));
        writes.extend(dump.nodes.into_iter().map(Write::Node));
        writes.extend(dump.edges.into_iter().map(Write::Edge));
        writes.extend(dump.versions.into_iter().map(Write::Version));
        writes.extend(dump.node_versions.into_iter().map(Write::NodeVersion));
        writes.extend(dump.edge_versions.into_iter().map(Write::EdgeVersion));
        writes.extend(dump.tags.into_iter().map(Write::Tag));

        let mut state = Self::new();
        state.check(&writes)?;
        state.apply(writes);

        let next_id = dump.next_id.max(state.max_id() + 1);
        Ok((state, next_id))
    }

    pub fn to_dump(&self, next_id: u64) -> GraphDump {
        let mut node_versions = Vec::new();
        let mut edge_versions = Vec::new();
        for version_id in self.versions.keys() {
            if let Some(entries) = self.entries.get(version_id) {
                node_versions.extend(entries.nodes.iter().cloned());
                edge_versions.extend(entries.edges.iter().cloned());
            }
        }

        GraphDump {
            next_id,
            trees: self.trees.values().cloned().collect(),
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
            versions: self.versions.values().cloned().collect(),
            node_versions,
            edge_versions,
            tags: self.tags.values().cloned().collect(),
        }
    }

    fn max_id(&self) -> u64 {
        let entry_max = self.entry_ids.iter().copied().max();

        [
            self.trees.keys().next_back().map(|id| id.0),
            self.nodes.keys().next_back().map(|id| id.0),
            self.edges.keys().next_back().map(|id| id.0),
            self.versions.keys().next_back().map(|id| id.0),
            self.tags.keys().next_back().map(|id| id.0),
            entry_max,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }

    // --- чтение ---

    pub fn tree(&self, id: TreeId) -> Option<&Tree> {
        self.trees.get(&id)
    }

    pub fn trees(&self) -> Vec<Tree> {
        self.trees.values().cloned().collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn version(&self, id: VersionId) -> Option<&Version> {
        self.versions.get(&id)
    }

    pub fn versions_of(&self, tree: TreeId) -> Vec<Version> {
        self.versions
            .values()
            .filter(|v| v.tree_id == tree)
            .cloned()
            .collect()
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tag_names.get(name).and_then(|id| self.tags.get(id))
    }

    pub fn tag_of(&self, version: VersionId) -> Option<&Tag> {
        self.tagged.get(&version).and_then(|id| self.tags.get(id))
    }

    pub fn tags_of(&self, tree: TreeId) -> Vec<Tag> {
        self.tags
            .values()
            .filter(|t| t.tree_id == tree)
            .cloned()
            .collect()
    }

    pub fn live_graph(&self, tree: TreeId) -> LiveGraph {
        let nodes: Vec<Node> = self
            .nodes
            .values()
            .filter(|n| n.tree_id == tree)
            .cloned()
            .collect();

        let in_tree = |id: &NodeId| self.nodes.get(id).is_some_and(|n| n.tree_id == tree);
        let edges = self
            .edges
            .values()
            .filter(|e| in_tree(&e.incoming_node_id) && in_tree(&e.outgoing_node_id))
            .cloned()
            .collect();

        LiveGraph { nodes, edges }
    }

    pub fn frozen(&self, id: VersionId) -> Option<FrozenVersion> {
        let version = self.versions.get(&id)?.clone();
        let (nodes, edges) = match self.entries.get(&id) {
            Some(entries) => {
                let edges = entries
                    .edges
                    .iter()
                    .filter_map(|ev| {
                        let edge = self.edges.get(&ev.edge_id)?;
                        Some(FrozenEdge {
                            entry: ev.clone(),
                            incoming_node_id: edge.incoming_node_id,
                            outgoing_node_id: edge.outgoing_node_id,
                        })
                    })
                    .collect();
                (entries.nodes.clone(), edges)
            }
            None => (Vec::new(), Vec::new()),
        };

        Some(FrozenVersion { version, nodes, edges })
    }

    // --- запись ---

    fn node_tree(&self, pending: &Pending, id: NodeId) -> Option<TreeId> {
        self.nodes
            .get(&id)
            .map(|n| n.tree_id)
            .or_else(|| pending.nodes.get(&id).copied())
    }

    fn version_tree(&self, pending: &Pending, id: VersionId) -> Option<TreeId> {
        self.versions
            .get(&id)
            .map(|v| v.tree_id)
            .or_else(|| pending.versions.get(&id).copied())
    }

    fn tree_exists(&self, pending: &Pending, id: TreeId) -> bool {
        self.trees.contains_key(&id) || pending.trees.contains(&id)
    }

    /// Проверяет пачку целиком, ничего не меняя.
    pub fn check(&self, writes: &[Write]) -> Result<()> {
        let mut pending = Pending::default();

        for write in writes {
            match write {
                Write::Tree(tree) => {
                    fresh_id(&mut pending, tree.id.0, self.trees.contains_key(&tree.id))?;
                    pending.trees.insert(tree.id);
                }
                Write::Node(node) => {
                    fresh_id(&mut pending, node.id.0, self.nodes.contains_key(&node.id))?;
                    if !self.tree_exists(&pending, node.tree_id) {
                        return Err(StorageError::Missing(RecordKey::Tree(node.tree_id)));
                    }
                    pending.nodes.insert(node.id, node.tree_id);
                }
                Write::Edge(edge) => {
                    fresh_id(&mut pending, edge.id.0, self.edges.contains_key(&edge.id))?;
                    let incoming = self
                        .node_tree(&pending, edge.incoming_node_id)
                        .ok_or(StorageError::Missing(RecordKey::Node(edge.incoming_node_id)))?;
                    let outgoing = self
                        .node_tree(&pending, edge.outgoing_node_id)
                        .ok_or(StorageError::Missing(RecordKey::Node(edge.outgoing_node_id)))?;
                    if incoming != outgoing {
                        return Err(StorageError::ForeignKey(format!(
                            "edge {} connects nodes of trees {} and {}",
                            edge.id, incoming, outgoing
                        )));
                    }
                    pending.edges.insert(edge.id, edge.incoming_node_id);
                }
                Write::Version(version) => {
                    fresh_id(&mut pending, version.id.0, self.versions.contains_key(&version.id))?;
                    if !self.tree_exists(&pending, version.tree_id) {
                        return Err(StorageError::Missing(RecordKey::Tree(version.tree_id)));
                    }
                    if let Some(parent) = version.parent_version_id {
                        let parent_tree = self
                            .version_tree(&pending, parent)
                            .ok_or(StorageError::Missing(RecordKey::Version(parent)))?;
                        if parent_tree != version.tree_id {
                            return Err(StorageError::ForeignKey(format!(
                                "version {} has parent {} from tree {}",
                                version.id, parent, parent_tree
                            )));
                        }
                    }
                    pending.versions.insert(version.id, version.tree_id);
                }
                Write::NodeVersion(nv) => {
                    fresh_id(&mut pending, nv.id.0, self.entry_ids.contains(&nv.id.0))?;
                    let version_tree = self
                        .version_tree(&pending, nv.version_id)
                        .ok_or(StorageError::Missing(RecordKey::Version(nv.version_id)))?;
                    let node_tree = self
                        .node_tree(&pending, nv.node_id)
                        .ok_or(StorageError::Missing(RecordKey::Node(nv.node_id)))?;
                    if node_tree != version_tree {
                        return Err(StorageError::ForeignKey(format!(
                            "node {} does not belong to tree {}",
                            nv.node_id, version_tree
                        )));
                    }
                    let taken = self
                        .entries
                        .get(&nv.version_id)
                        .is_some_and(|e| e.node_ids.contains(&nv.node_id));
                    if taken || !pending.node_entries.insert((nv.node_id, nv.version_id)) {
                        return Err(StorageError::UniqueViolation(Constraint::NodeEntry {
                            node: nv.node_id,
                            version: nv.version_id,
                        }));
                    }
                }
                Write::EdgeVersion(ev) => {
                    fresh_id(&mut pending, ev.id.0, self.entry_ids.contains(&ev.id.0))?;
                    let version_tree = self
                        .version_tree(&pending, ev.version_id)
                        .ok_or(StorageError::Missing(RecordKey::Version(ev.version_id)))?;
                    let incoming = self
                        .edges
                        .get(&ev.edge_id)
                        .map(|e| e.incoming_node_id)
                        .or_else(|| pending.edges.get(&ev.edge_id).copied())
                        .ok_or(StorageError::Missing(RecordKey::Edge(ev.edge_id)))?;
                    if self.node_tree(&pending, incoming) != Some(version_tree) {
                        return Err(StorageError::ForeignKey(format!(
                            "edge {} does not belong to tree {}",
                            ev.edge_id, version_tree
                        )));
                    }
                    let taken = self
                        .entries
                        .get(&ev.version_id)
                        .is_some_and(|e| e.edge_ids.contains(&ev.edge_id));
                    if taken || !pending.edge_entries.insert((ev.edge_id, ev.version_id)) {
                        return Err(StorageError::UniqueViolation(Constraint::EdgeEntry {
                            edge: ev.edge_id,
                            version: ev.version_id,
                        }));
                    }
                }
                Write::Tag(tag) => {
                    fresh_id(&mut pending, tag.id.0, self.tags.contains_key(&tag.id))?;
                    if !self.tree_exists(&pending, tag.tree_id) {
                        return Err(StorageError::Missing(RecordKey::Tree(tag.tree_id)));
                    }
                    let version_tree = self
                        .version_tree(&pending, tag.version_id)
                        .ok_or(StorageError::Missing(RecordKey::Version(tag.version_id)))?;
                    if version_tree != tag.tree_id {
                        return Err(StorageError::ForeignKey(format!(
                            "tag '{}' points to version {} of another tree",
                            tag.name, tag.version_id
                        )));
                    }
                    if self.tag_names.contains_key(&tag.name)
                        || !pending.tag_names.insert(tag.name.as_str())
                    {
                        let name = tag.name.clone();
                        return Err(StorageError::UniqueViolation(Constraint::TagName(name)));
                    }
                    if self.tagged.contains_key(&tag.version_id)
                        || !pending.tagged.insert(tag.version_id)
                    {
                        let version = tag.version_id;
                        return Err(StorageError::UniqueViolation(Constraint::TagVersion(version)));
                    }
                }
                Write::NodeData { id, .. } => {
                    if self.node_tree(&pending, *id).is_none() {
                        return Err(StorageError::Missing(RecordKey::Node(*id)));
                    }
                }
                Write::EdgeData { id, .. } => {
                    if !self.edges.contains_key(id) && !pending.edges.contains_key(id) {
                        return Err(StorageError::Missing(RecordKey::Edge(*id)));
                    }
                }
            }
        }

        Ok(())
    }

    /// Применяет пачку, уже прошедшую `check`.
    pub fn apply(&mut self, writes: Vec<Write>) {
        for write in writes {
            match write {
                Write::Tree(tree) => {
                    self.trees.insert(tree.id, tree);
                }
                Write::Node(node) => {
                    self.nodes.insert(node.id, node);
                }
                Write::Edge(edge) => {
                    self.edges.insert(edge.id, edge);
                }
                Write::Version(version) => {
                    self.versions.insert(version.id, version);
                }
                Write::NodeVersion(nv) => {
                    self.entry_ids.insert(nv.id.0);
                    let entries = self.entries.entry(nv.version_id).or_default();
                    entries.node_ids.insert(nv.node_id);
                    entries.nodes.push(nv);
                }
                Write::EdgeVersion(ev) => {
                    self.entry_ids.insert(ev.id.0);
                    let entries = self.entries.entry(ev.version_id).or_default();
                    entries.edge_ids.insert(ev.edge_id);
                    entries.edges.push(ev);
                }
                Write::Tag(tag) => {
                    self.tag_names.insert(tag.name.clone(), tag.id);
                    self.tagged.insert(tag.version_id, tag.id);
                    self.tags.insert(tag.id, tag);
                }
                Write::NodeData { id, data } => {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.data = data;
                    }
                }
                Write::EdgeData { id, data } => {
                    if let Some(edge) = self.edges.get_mut(&id) {
                        edge.data = data;
                    }
                }
            }
        }
    }

    /// Удаляет дерево и всё, чем оно владеет.
    pub fn purge(&mut self, tree: TreeId) -> Result<PurgeReport> {
        if self.trees.remove(&tree).is_none() {
            return Err(StorageError::Missing(RecordKey::Tree(tree)));
        }

        let mut report = PurgeReport::default();

        let node_ids: HashSet<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.tree_id == tree)
            .map(|n| n.id)
            .collect();
        self.nodes.retain(|id, _| !node_ids.contains(id));
        report.nodes = node_ids.len();

        let before = self.edges.len();
        self.edges.retain(|_, e| {
            !node_ids.contains(&e.incoming_node_id) && !node_ids.contains(&e.outgoing_node_id)
        });
        report.edges = before - self.edges.len();

        let version_ids: Vec<VersionId> = self
            .versions
            .values()
            .filter(|v| v.tree_id == tree)
            .map(|v| v.id)
            .collect();
        for id in &version_ids {
            self.versions.remove(id);
            if let Some(entries) = self.entries.remove(id) {
                for nv in &entries.nodes {
                    self.entry_ids.remove(&nv.id.0);
                }
                for ev in &entries.edges {
                    self.entry_ids.remove(&ev.id.0);
                }
                report.node_versions += entries.nodes.len();
                report.edge_versions += entries.edges.len();
            }
        }
        report.versions = version_ids.len();

        let tag_ids: Vec<TagId> = self
            .tags
            .values()
            .filter(|t| t.tree_id == tree)
            .map(|t| t.id)
            .collect();
        for id in &tag_ids {
            if let Some(tag) = self.tags.remove(id) {
                self.tag_names.remove(&tag.name);
                self.tagged.remove(&tag.version_id);
            }
        }
        report.tags = tag_ids.len();

        Ok(report)
    }
}

fn fresh_id(pending: &mut Pending, id: u64, known: bool) -> Result<()> {
    if known || !pending.ids.insert(id) {
        return Err(StorageError::UniqueViolation(Constraint::Id(id)));
    }
    Ok(())
}
