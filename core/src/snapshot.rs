use std::sync::Arc;
use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::storage::{GraphStorage, TxHandle, Write};
use crate::types::{EdgeVersion, EdgeVersionId, NodeVersion, NodeVersionId, TreeId, Version};

/// Сколько записей добавлено в целевую версию.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Заполняет замороженные записи целевой версии.
///
/// Движок только кладёт записи в переданную транзакцию: атомарность
/// (снимок + привязка тега) обеспечивает тот, кто транзакцию коммитит.
#[derive(Clone)]
pub struct SnapshotEngine {
    storage: Arc<dyn GraphStorage>,
}

impl SnapshotEngine {
    pub fn new(storage: Arc<dyn GraphStorage>) -> Self {
        Self { storage }
    }

    /// Копирует текущее живое состояние дерева в `target`.
    ///
    /// Данные копируются по значению: последующие изменения живых нод и рёбер
    /// в записях `target` не видны.
    pub fn snapshot_live_state(
        &self,
        tx: &mut TxHandle,
        tree: TreeId,
        target: &Version,
    ) -> Result<SnapshotStats> {
        let live = self.storage.live_graph(tree)?;
        let now = Utc::now();

        for node in &live.nodes {
            tx.stage(Write::NodeVersion(NodeVersion {
                id: NodeVersionId(self.storage.next_id()?),
                node_id: node.id,
                version_id: target.id,
                data: node.data.clone(),
                created_at: now,
            }));
        }

        for edge in &live.edges {
            tx.stage(Write::EdgeVersion(EdgeVersion {
                id: EdgeVersionId(self.storage.next_id()?),
                edge_id: edge.id,
                version_id: target.id,
                data: edge.data.clone(),
                created_at: now,
            }));
        }

        let stats = SnapshotStats { nodes: live.nodes.len(), edges: live.edges.len() };
        debug!(
            tree = %tree, version = %target.id,
            nodes = stats.nodes, edges = stats.edges, "live state staged"
        );
        Ok(stats)
    }

    /// Копирует все записи `source` в `target`, сохраняя идентичность нод и рёбер.
    /// Живой граф при этом не читается.
    pub fn duplicate_version(
        &self,
        tx: &mut TxHandle,
        source: &Version,
        target: &Version,
    ) -> Result<SnapshotStats> {
        let frozen = self.storage.frozen_version(source.id)?;
        let now = Utc::now();

        for entry in &frozen.nodes {
            tx.stage(Write::NodeVersion(NodeVersion {
                id: NodeVersionId(self.storage.next_id()?),
                node_id: entry.node_id,
                version_id: target.id,
                data: entry.data.clone(),
                created_at: now,
            }));
        }

        for edge in &frozen.edges {
            tx.stage(Write::EdgeVersion(EdgeVersion {
                id: EdgeVersionId(self.storage.next_id()?),
                edge_id: edge.entry.edge_id,
                version_id: target.id,
                data: edge.entry.data.clone(),
                created_at: now,
            }));
        }

        let stats = SnapshotStats { nodes: frozen.nodes.len(), edges: frozen.edges.len() };
        debug!(
            source = %source.id, target = %target.id,
            nodes = stats.nodes, edges = stats.edges, "version duplicated"
        );
        Ok(stats)
    }
}
