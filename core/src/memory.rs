use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::state::{GraphDump, GraphState};
use crate::storage::{GraphStorage, RecordKey, Result, StorageError, TxHandle};
use crate::types::{
    Edge, EdgeId, FrozenVersion, LiveGraph, Node, NodeId, PurgeReport, Tag, Tree, TreeId, Version,
    VersionId,
};

/// Хранилище целиком в памяти. Используется в тестах и как основа файловых хранилищ.
///
/// Коммиты сериализуются блокировкой записи, поэтому из двух транзакций,
/// претендующих на одно уникальное значение, проходит ровно одна.
pub struct MemoryStorage {
    state: RwLock<GraphState>,
    sequence: AtomicU64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::from_state(GraphState::new(), 1)
    }

    pub fn from_state(state: GraphState, next_id: u64) -> Self {
        Self {
            state: RwLock::new(state),
            sequence: AtomicU64::new(next_id.max(1)),
        }
    }

    pub fn from_dump(dump: GraphDump) -> Result<Self> {
        let (state, next_id) = GraphState::from_dump(dump)?;
        Ok(Self::from_state(state, next_id))
    }

    pub fn dump(&self) -> Result<GraphDump> {
        Ok(self.read()?.to_dump(self.sequence.load(Ordering::SeqCst)))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>> {
        self.state.read().map_err(|_| StorageError::Tx("Lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>> {
        self.state.write().map_err(|_| StorageError::Tx("Lock poisoned".into()))
    }

    /// Коммит с публикацией: `publish` получает таблицы после применения пачки
    /// и может отказать (например, не удалось записать файл). Тогда таблицы в памяти
    /// остаются прежними.
    pub fn commit_and_publish<F>(&self, tx: TxHandle, publish: F) -> Result<()>
    where
        F: FnOnce(&GraphState, u64) -> Result<()>,
    {
        let tx_id = tx.id;
        let mut state = self.write()?;
        let writes = tx.into_writes();
        state.check(&writes)?;

        let mut next = state.clone();
        let count = writes.len();
        next.apply(writes);
        publish(&next, self.sequence.load(Ordering::SeqCst))?;
        *state = next;

        debug!(tx = tx_id, writes = count, "transaction committed");
        Ok(())
    }

    pub fn purge_and_publish<F>(&self, tree: TreeId, publish: F) -> Result<PurgeReport>
    where
        F: FnOnce(&GraphState, u64) -> Result<()>,
    {
        let mut state = self.write()?;
        let mut next = state.clone();
        let report = next.purge(tree)?;
        publish(&next, self.sequence.load(Ordering::SeqCst))?;
        *state = next;
        Ok(report)
    }
}

impl GraphStorage for MemoryStorage {
    fn next_id(&self) -> Result<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    fn load_tree(&self, id: TreeId) -> Result<Tree> {
        self.read()?
            .tree(id)
            .cloned()
            .ok_or(StorageError::Missing(RecordKey::Tree(id)))
    }

    fn list_trees(&self) -> Result<Vec<Tree>> {
        Ok(self.read()?.trees())
    }

    fn load_node(&self, id: NodeId) -> Result<Node> {
        self.read()?
            .node(id)
            .cloned()
            .ok_or(StorageError::Missing(RecordKey::Node(id)))
    }

    fn load_edge(&self, id: EdgeId) -> Result<Edge> {
        self.read()?
            .edge(id)
            .cloned()
            .ok_or(StorageError::Missing(RecordKey::Edge(id)))
    }

    fn load_version(&self, id: VersionId) -> Result<Version> {
        self.read()?
            .version(id)
            .cloned()
            .ok_or(StorageError::Missing(RecordKey::Version(id)))
    }

    fn list_versions(&self, tree: TreeId) -> Result<Vec<Version>> {
        Ok(self.read()?.versions_of(tree))
    }

    fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self.read()?.tag_by_name(name).cloned())
    }

    fn tag_of_version(&self, version: VersionId) -> Result<Option<Tag>> {
        Ok(self.read()?.tag_of(version).cloned())
    }

    fn list_tags(&self, tree: TreeId) -> Result<Vec<Tag>> {
        Ok(self.read()?.tags_of(tree))
    }

    fn live_graph(&self, tree: TreeId) -> Result<LiveGraph> {
        Ok(self.read()?.live_graph(tree))
    }

    fn frozen_version(&self, version: VersionId) -> Result<FrozenVersion> {
        self.read()?
            .frozen(version)
            .ok_or(StorageError::Missing(RecordKey::Version(version)))
    }

    fn begin_tx(&self) -> Result<TxHandle> {
        Ok(TxHandle::new(self.next_id()?))
    }

    fn commit_tx(&self, tx: TxHandle) -> Result<()> {
        let tx_id = tx.id;
        let mut state = self.write()?;
        let writes = tx.into_writes();
        state.check(&writes)?;
        let count = writes.len();
        state.apply(writes);
        debug!(tx = tx_id, writes = count, "transaction committed");
        Ok(())
    }

    fn rollback_tx(&self, tx: TxHandle) -> Result<()> {
        if !tx.is_empty() {
            warn!(tx = tx.id, writes = tx.len(), "transaction rolled back");
        }
        Ok(())
    }

    fn purge_tree(&self, tree: TreeId) -> Result<PurgeReport> {
        self.write()?.purge(tree)
    }
}


/// Хранилище для тестов, у которого чтение живых нод всегда падает.
#[cfg(test)]
pub(crate) mod faulty {
    use super::*;

    #[derive(Default)]
    pub(crate) struct NodeReadsFail {
        inner: MemoryStorage,
    }

    impl GraphStorage for NodeReadsFail {
        fn next_id(&self) -> Result<u64> {
            self.inner.next_id()
        }

        fn load_tree(&self, id: TreeId) -> Result<Tree> {
            self.inner.load_tree(id)
        }

        fn list_trees(&self) -> Result<Vec<Tree>> {
            self.inner.list_trees()
        }

        fn load_node(&self, _id: NodeId) -> Result<Node> {
            Err(StorageError::Tx("disk unavailable".into()))
        }

        fn load_edge(&self, id: EdgeId) -> Result<Edge> {
            self.inner.load_edge(id)
        }

        fn load_version(&self, id: VersionId) -> Result<Version> {
            self.inner.load_version(id)
        }

        fn list_versions(&self, tree: TreeId) -> Result<Vec<Version>> {
            self.inner.list_versions(tree)
        }

        fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
            self.inner.find_tag(name)
        }

        fn tag_of_version(&self, version: VersionId) -> Result<Option<Tag>> {
            self.inner.tag_of_version(version)
        }

        fn list_tags(&self, tree: TreeId) -> Result<Vec<Tag>> {
            self.inner.list_tags(tree)
        }

        fn live_graph(&self, tree: TreeId) -> Result<LiveGraph> {
            self.inner.live_graph(tree)
        }

        fn frozen_version(&self, version: VersionId) -> Result<FrozenVersion> {
            self.inner.frozen_version(version)
        }

        fn begin_tx(&self) -> Result<TxHandle> {
            self.inner.begin_tx()
        }

        fn commit_tx(&self, tx: TxHandle) -> Result<()> {
            self.inner.commit_tx(tx)
        }

        fn rollback_tx(&self, tx: TxHandle) -> Result<()> {
            self.inner.rollback_tx(tx)
        }

        fn purge_tree(&self, tree: TreeId) -> Result<PurgeReport> {
            self.inner.purge_tree(tree)
        }
    }
}
