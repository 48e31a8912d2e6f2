use std::sync::Arc;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, Validation};
use crate::storage::{GraphStorage, RecordKey, StorageError, Write};
use crate::types::{Edge, EdgeId, LiveGraph, Node, NodeId, PurgeReport, Tree, TreeId};

/// Живые ноды и рёбра с их изменяемыми метаданными.
///
/// Изменения здесь никогда не затрагивают `NodeVersion`/`EdgeVersion`:
/// снимки хранят копию значения, а не ссылку на живые данные.
#[derive(Clone)]
pub struct GraphStore {
    storage: Arc<dyn GraphStorage>,
}

impl GraphStore {
    pub fn new(storage: Arc<dyn GraphStorage>) -> Self {
        Self { storage }
    }

    pub fn create_tree(&self, name: impl Into<String>) -> Result<Tree> {
        let tree = Tree {
            id: TreeId(self.storage.next_id()?),
            name: name.into(),
            created_at: Utc::now(),
        };

        let mut tx = self.storage.begin_tx()?;
        tx.stage(Write::Tree(tree.clone()));
        self.storage.commit_tx(tx)?;

        debug!(tree = %tree.id, name = %tree.name, "tree created");
        Ok(tree)
    }

    pub fn tree(&self, id: TreeId) -> Result<Tree> {
        Ok(self.storage.load_tree(id)?)
    }

    pub fn trees(&self) -> Result<Vec<Tree>> {
        Ok(self.storage.list_trees()?)
    }

    pub fn create_node(&self, tree: TreeId, data: Value) -> Result<Node> {
        self.storage.load_tree(tree)?;

        let node = Node {
            id: NodeId(self.storage.next_id()?),
            tree_id: tree,
            data,
            created_at: Utc::now(),
        };

        let mut tx = self.storage.begin_tx()?;
        tx.stage(Write::Node(node.clone()));
        self.storage.commit_tx(tx)?;

        debug!(tree = %tree, node = %node.id, "live node created");
        Ok(node)
    }

    /// Создаёт живое ребро `incoming -> outgoing`.
    ///
    /// # Errors
    ///
    /// `EndpointNotInTree`, если любой из концов не существует или принадлежит другому дереву.
    pub fn create_edge(
        &self,
        tree: TreeId,
        incoming: NodeId,
        outgoing: NodeId,
        data: Value,
    ) -> Result<Edge> {
        self.storage.load_tree(tree)?;
        for node in [incoming, outgoing] {
            self.require_endpoint(tree, node)?;
        }

        let edge = Edge {
            id: EdgeId(self.storage.next_id()?),
            incoming_node_id: incoming,
            outgoing_node_id: outgoing,
            data,
            created_at: Utc::now(),
        };

        let mut tx = self.storage.begin_tx()?;
        tx.stage(Write::Edge(edge.clone()));
        self.storage.commit_tx(tx)?;

        debug!(tree = %tree, edge = %edge.id, "live edge created");
        Ok(edge)
    }

    fn require_endpoint(&self, tree: TreeId, node: NodeId) -> Result<()> {
        if !node_in_tree(self.storage.as_ref(), node, tree)? {
            return Err(Validation::EndpointNotInTree { node, tree }.into());
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<Node> {
        Ok(self.storage.load_node(id)?)
    }

    pub fn edge(&self, id: EdgeId) -> Result<Edge> {
        Ok(self.storage.load_edge(id)?)
    }

    pub fn set_node_data(&self, id: NodeId, data: Value) -> Result<Node> {
        let mut node = self.storage.load_node(id)?;

        let mut tx = self.storage.begin_tx()?;
        tx.stage(Write::NodeData { id, data: data.clone() });
        self.storage.commit_tx(tx)?;

        node.data = data;
        Ok(node)
    }

    pub fn set_edge_data(&self, id: EdgeId, data: Value) -> Result<Edge> {
        let mut edge = self.storage.load_edge(id)?;

        let mut tx = self.storage.begin_tx()?;
        tx.stage(Write::EdgeData { id, data: data.clone() });
        self.storage.commit_tx(tx)?;

        edge.data = data;
        Ok(edge)
    }

    pub fn live_graph(&self, tree: TreeId) -> Result<LiveGraph> {
        self.storage.load_tree(tree)?;
        Ok(self.storage.live_graph(tree)?)
    }

    /// Явно удаляет дерево со всеми нодами, рёбрами, версиями и тегами.
    pub fn purge_tree(&self, tree: TreeId) -> Result<PurgeReport> {
        let report = self.storage.purge_tree(tree)?;
        debug!(tree = %tree, ?report, "tree purged");
        Ok(report)
    }
}

/// Принадлежит ли живая нода дереву. Отсутствующая нода даёт `Ok(false)`,
/// остальные ошибки хранилища пробрасываются как есть.
pub(crate) fn node_in_tree(storage: &dyn GraphStorage, node: NodeId, tree: TreeId) -> Result<bool> {
    match storage.load_node(node) {
        Ok(n) => Ok(n.tree_id == tree),
        Err(StorageError::Missing(RecordKey::Node(_))) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
