use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use tracing::debug;

use tv_core::memory::MemoryStorage;
use tv_core::state::{GraphDump, GraphState};
use tv_core::storage::{GraphStorage, Result, StorageError, TxHandle};
use tv_core::types::{
    Edge, EdgeId, FrozenVersion, LiveGraph, Node, NodeId, PurgeReport, Tag, Tree, TreeId, Version,
    VersionId,
};

/// Хранилище графа в одном JSON-файле.
///
/// Таблицы живут в памяти (`MemoryStorage`); каждый коммит сначала записывает
/// новое состояние во временный файл и переименовывает его поверх основного,
/// и только после успешной записи публикует изменения в памяти.
pub struct JsonStorage {
    db_path: PathBuf,
    inner: MemoryStorage,
}

impl JsonStorage {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let file = File::open(&path).map_err(StorageError::Io)?;
            let reader = BufReader::new(file);
            let dump: GraphDump = serde_json::from_reader(reader).map_err(StorageError::Serde)?;
            MemoryStorage::from_dump(dump)?
        } else {
            MemoryStorage::new()
        };

        let storage = Self { db_path: path, inner };
        if !storage.db_path.exists() {
            storage.save(&storage.inner.dump()?)?;
        }
        Ok(storage)
    }

    fn save(&self, dump: &GraphDump) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }

        let tmp = self.db_path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).map_err(StorageError::Io)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, dump).map_err(StorageError::Serde)?;
            writer.flush().map_err(StorageError::Io)?;
        }
        fs::rename(&tmp, &self.db_path).map_err(StorageError::Io)?;

        debug!(path = %self.db_path.display(), "graph saved");
        Ok(())
    }

    fn publish(&self, state: &GraphState, next_id: u64) -> Result<()> {
        self.save(&state.to_dump(next_id))
    }
}

impl GraphStorage for JsonStorage {
    fn next_id(&self) -> Result<u64> {
        self.inner.next_id()
    }

    fn load_tree(&self, id: TreeId) -> Result<Tree> {
        self.inner.load_tree(id)
    }

    fn list_trees(&self) -> Result<Vec<Tree>> {
        self.inner.list_trees()
    }

    fn load_node(&self, id: NodeId) -> Result<Node> {
        self.inner.load_node(id)
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
        self.inner.commit_and_publish(tx, |state, next_id| self.publish(state, next_id))
    }

    fn rollback_tx(&self, tx: TxHandle) -> Result<()> {
        self.inner.rollback_tx(tx)
    }

    fn purge_tree(&self, tree: TreeId) -> Result<PurgeReport> {
        self.inner.purge_and_publish(tree, |state, next_id| self.publish(state, next_id))
    }
}
