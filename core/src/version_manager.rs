use std::collections::HashSet;
use std::sync::Arc;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{Result, Validation};
use crate::graph_store::node_in_tree;
use crate::snapshot::SnapshotEngine;
use crate::storage::{GraphStorage, TxHandle, Write};
use crate::tag_registry::TagRegistry;
use crate::traversal::TraversalEngine;
use crate::types::{
    Edge, EdgeId, EdgeVersion, EdgeVersionId, Node, NodeId, NodeVersion, NodeVersionId, Tag,
    TreeId, Version, VersionId,
};

/// Основной компонент бизнес-логики версионирования.
/// Создаёт версии, ведёт их родословную, делает снимок при теге и копию при ветвлении.
///
/// Каждая публичная операция, пишущая в хранилище, выполняется одной транзакцией:
/// при любой ошибке не сохраняется ни версия, ни тег, ни записи.
#[derive(Clone)]
pub struct VersionManager {
    storage: Arc<dyn GraphStorage>,
    snapshots: SnapshotEngine,
    tags: TagRegistry,
    config: EngineConfig,
}

impl VersionManager {
    pub fn new(storage: Arc<dyn GraphStorage>, config: EngineConfig) -> Self {
        Self {
            snapshots: SnapshotEngine::new(storage.clone()),
            tags: TagRegistry::new(storage.clone()),
            storage,
            config,
        }
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    /// Выполняет `stage` в новой транзакции. Ошибка до коммита откатывает транзакцию.
    fn in_tx<T, F>(&self, with_tag: bool, stage: F) -> Result<T>
    where
        F: FnOnce(&mut TxHandle) -> Result<T>,
    {
        let mut tx = self.storage.begin_tx()?;
        match stage(&mut tx) {
            Ok(value) => {
                if with_tag {
                    self.tags.commit(tx)?;
                } else {
                    self.storage.commit_tx(tx)?;
                }
                Ok(value)
            }
            Err(err) => {
                warn!(tx = tx.id, error = %err, "staging failed");
                self.storage.rollback_tx(tx)?;
                Err(err)
            }
        }
    }

    fn new_version(&self, tree: TreeId, parent: Option<VersionId>) -> Result<Version> {
        Ok(Version {
            id: VersionId(self.storage.next_id()?),
            tree_id: tree,
            parent_version_id: parent,
            created_at: Utc::now(),
        })
    }

    /// Создаёт новую пустую версию. Родитель, если указан, должен принадлежать тому же дереву.
    pub fn create_version(&self, tree: TreeId, parent: Option<VersionId>) -> Result<Version> {
        self.storage.load_tree(tree)?;
        if let Some(parent_id) = parent {
            self.version_in_tree(tree, parent_id)?;
        }

        let version = self.new_version(tree, parent)?;
        self.in_tx(false, |tx| {
            tx.stage(Write::Version(version.clone()));
            Ok(())
        })?;

        info!(tree = %tree, version = %version.id, parent = ?parent, "version created");
        Ok(version)
    }

    pub fn version(&self, id: VersionId) -> Result<Version> {
        Ok(self.storage.load_version(id)?)
    }

    fn version_in_tree(&self, tree: TreeId, id: VersionId) -> Result<Version> {
        let version = self.storage.load_version(id)?;
        if version.tree_id != tree {
            return Err(Validation::VersionNotInTree { version: id, tree }.into());
        }
        Ok(version)
    }

    /// Все версии дерева в порядке создания.
    pub fn versions(&self, tree: TreeId) -> Result<Vec<Version>> {
        self.storage.load_tree(tree)?;
        Ok(self.storage.list_versions(tree)?)
    }

    /// Версия и её предки по `parent_version_id`, от ближайшего.
    pub fn lineage(&self, id: VersionId) -> Result<Vec<Version>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(id);

        while let Some(current) = next {
            if !seen.insert(current) {
                break;
            }
            let version = self.storage.load_version(current)?;
            next = version.parent_version_id;
            chain.push(version);
        }

        Ok(chain)
    }

    /// Снимок текущего живого состояния дерева в новую версию с тегом `name`.
    ///
    /// Версия, её записи и тег создаются одной транзакцией; при конфликте имени
    /// не сохраняется ничего.
    pub fn create_tag_for_live_state(
        &self,
        tree: TreeId,
        name: &str,
        description: Option<String>,
    ) -> Result<Tag> {
        self.storage.load_tree(tree)?;
        let version = self.new_version(tree, None)?;

        let (tag, stats) = self.in_tx(true, |tx| {
            tx.stage(Write::Version(version.clone()));
            let stats = self.snapshots.snapshot_live_state(tx, tree, &version)?;
            let tag = self.tags.stage_bind(tx, tree, name, description, &version)?;
            Ok((tag, stats))
        })?;

        info!(
            tree = %tree, tag = %tag.name, version = %version.id,
            nodes = stats.nodes, edges = stats.edges, "live state tagged"
        );
        Ok(tag)
    }

    /// Привязывает имя к существующей версии без тега.
    pub fn create_tag_for_version(
        &self,
        tree: TreeId,
        name: &str,
        description: Option<String>,
        version: VersionId,
    ) -> Result<Tag> {
        let version = self.version_in_tree(tree, version)?;
        let tag =
            self.in_tx(true, |tx| self.tags.stage_bind(tx, tree, name, description, &version))?;

        info!(tree = %tree, tag = %tag.name, version = %version.id, "version tagged");
        Ok(tag)
    }

    fn stage_branch(&self, tx: &mut TxHandle, tree: TreeId, tag_name: &str) -> Result<Version> {
        let tag = self.tags.find_in_tree(tree, tag_name)?;
        let base = self.storage.load_version(tag.version_id)?;
        let branch = self.new_version(tree, Some(base.id))?;

        tx.stage(Write::Version(branch.clone()));
        self.snapshots.duplicate_version(tx, &base, &branch)?;
        Ok(branch)
    }

    /// Новая версия от версии с тегом `tag_name`: родитель = базовая версия,
    /// записи скопированы из неё. Дальнейшие добавления в ветку базу не меняют.
    pub fn branch_from_tag(&self, tree: TreeId, tag_name: &str) -> Result<Version> {
        self.storage.load_tree(tree)?;
        let branch = self.in_tx(false, |tx| self.stage_branch(tx, tree, tag_name))?;

        info!(tree = %tree, base = tag_name, version = %branch.id, "branch created");
        Ok(branch)
    }

    /// Ветвление и тег новой ветки одной транзакцией.
    pub fn branch_and_tag(
        &self,
        tree: TreeId,
        base_tag: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<(Version, Tag)> {
        self.storage.load_tree(tree)?;
        let (branch, tag) = self.in_tx(true, |tx| {
            let branch = self.stage_branch(tx, tree, base_tag)?;
            let tag = self.tags.stage_bind(tx, tree, name, description, &branch)?;
            Ok((branch, tag))
        })?;

        info!(
            tree = %tree, base = base_tag, tag = %tag.name, version = %branch.id, "branch tagged"
        );
        Ok((branch, tag))
    }

    /// Версия по имени тега в глобальном пространстве имён. Только чтение.
    pub fn fetch_by_tag(&self, name: &str) -> Result<Version> {
        let tag = self.tags.find(name)?;
        Ok(self.storage.load_version(tag.version_id)?)
    }

    /// Историческая версия по тегу в пределах дерева.
    ///
    /// Несмотря на имя, это чтение: живой граф и другие версии не меняются.
    pub fn restore_from_tag(&self, tree: TreeId, name: &str) -> Result<Version> {
        let tag = self.tags.find_in_tree(tree, name)?;
        Ok(self.storage.load_version(tag.version_id)?)
    }

    /// Загружает версию для запросов обхода.
    pub fn open(&self, id: VersionId) -> Result<TraversalEngine> {
        let frozen = self.storage.frozen_version(id)?;
        Ok(TraversalEngine::new(frozen).with_max_path_depth(self.config.max_path_depth))
    }

    pub fn open_tag(&self, name: &str) -> Result<TraversalEngine> {
        let version = self.fetch_by_tag(name)?;
        self.open(version.id)
    }

    /// Создаёт новую живую ноду и её запись в версии.
    pub fn add_node(&self, version: VersionId, data: Value) -> Result<NodeVersion> {
        let version = self.storage.load_version(version)?;
        let node = Node {
            id: NodeId(self.storage.next_id()?),
            tree_id: version.tree_id,
            data: data.clone(),
            created_at: Utc::now(),
        };
        let entry = self.node_entry(node.id, version.id, data)?;

        self.in_tx(false, |tx| {
            tx.stage(Write::Node(node));
            tx.stage(Write::NodeVersion(entry.clone()));
            Ok(())
        })?;

        info!(version = %version.id, node = %entry.node_id, "node added");
        Ok(entry)
    }

    /// Запись в версии для уже существующей живой ноды того же дерева.
    pub fn add_existing_node(
        &self,
        version: VersionId,
        node: NodeId,
        data: Value,
    ) -> Result<NodeVersion> {
        let version = self.storage.load_version(version)?;
        let live = self.storage.load_node(node)?;
        if live.tree_id != version.tree_id {
            return Err(Validation::NodeNotInTree { node, tree: version.tree_id }.into());
        }

        let entry = self.node_entry(node, version.id, data)?;
        self.in_tx(false, |tx| {
            tx.stage(Write::NodeVersion(entry.clone()));
            Ok(())
        })?;

        info!(version = %version.id, node = %node, "existing node added");
        Ok(entry)
    }

    /// Создаёт живое ребро и его запись в версии.
    ///
    /// Концы ищутся среди живых нод дерева версии; при `strict_edge_endpoints`
    /// оба конца также должны иметь записи в самой версии.
    pub fn add_edge(
        &self,
        version: VersionId,
        incoming: NodeId,
        outgoing: NodeId,
        data: Value,
    ) -> Result<EdgeVersion> {
        let version = self.storage.load_version(version)?;
        for node in [incoming, outgoing] {
            if !node_in_tree(self.storage.as_ref(), node, version.tree_id)? {
                return Err(Validation::NodeNotInTree { node, tree: version.tree_id }.into());
            }
        }
        self.require_entries(&version, [incoming, outgoing])?;

        let edge = Edge {
            id: EdgeId(self.storage.next_id()?),
            incoming_node_id: incoming,
            outgoing_node_id: outgoing,
            data: data.clone(),
            created_at: Utc::now(),
        };
        let entry = self.edge_entry(edge.id, version.id, data)?;

        self.in_tx(false, |tx| {
            tx.stage(Write::Edge(edge));
            tx.stage(Write::EdgeVersion(entry.clone()));
            Ok(())
        })?;

        info!(version = %version.id, edge = %entry.edge_id, %incoming, %outgoing, "edge added");
        Ok(entry)
    }

    /// Запись в версии для уже существующего живого ребра того же дерева.
    pub fn add_existing_edge(
        &self,
        version: VersionId,
        edge: EdgeId,
        data: Value,
    ) -> Result<EdgeVersion> {
        let version = self.storage.load_version(version)?;
        let live = self.storage.load_edge(edge)?;
        for node in [live.incoming_node_id, live.outgoing_node_id] {
            if !node_in_tree(self.storage.as_ref(), node, version.tree_id)? {
                return Err(Validation::EndpointNotInTree { node, tree: version.tree_id }.into());
            }
        }
        self.require_entries(&version, [live.incoming_node_id, live.outgoing_node_id])?;

        let entry = self.edge_entry(edge, version.id, data)?;
        self.in_tx(false, |tx| {
            tx.stage(Write::EdgeVersion(entry.clone()));
            Ok(())
        })?;

        info!(version = %version.id, edge = %edge, "existing edge added");
        Ok(entry)
    }

    fn require_entries(&self, version: &Version, nodes: [NodeId; 2]) -> Result<()> {
        if !self.config.strict_edge_endpoints {
            return Ok(());
        }

        let frozen = self.storage.frozen_version(version.id)?;
        for node in nodes {
            if !frozen.nodes.iter().any(|nv| nv.node_id == node) {
                return Err(Validation::NodeNotInVersion { node, version: version.id }.into());
            }
        }
        Ok(())
    }

    fn node_entry(&self, node: NodeId, version: VersionId, data: Value) -> Result<NodeVersion> {
        Ok(NodeVersion {
            id: NodeVersionId(self.storage.next_id()?),
            node_id: node,
            version_id: version,
            data,
            created_at: Utc::now(),
        })
    }

    fn edge_entry(&self, edge: EdgeId, version: VersionId, data: Value) -> Result<EdgeVersion> {
        Ok(EdgeVersion {
            id: EdgeVersionId(self.storage.next_id()?),
            edge_id: edge,
            version_id: version,
            data,
            created_at: Utc::now(),
        })
    }

    /// Тег версии, если он есть.
    pub fn tag_of(&self, version: VersionId) -> Result<Option<Tag>> {
        self.storage.load_version(version)?;
        self.tags.tag_of(version)
    }
}
