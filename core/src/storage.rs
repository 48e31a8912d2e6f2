use std::fmt;
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    Edge, EdgeId, EdgeVersion, FrozenVersion, LiveGraph, Node, NodeId, NodeVersion, PurgeReport,
    Tag, Tree, TreeId, Version, VersionId,
};

/// Ключ записи, на которую ссылается ошибка хранилища.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    Tree(TreeId),
    Node(NodeId),
    Edge(EdgeId),
    Version(VersionId),
    Tag(String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Tree(id) => write!(f, "tree {id}"),
            RecordKey::Node(id) => write!(f, "node {id}"),
            RecordKey::Edge(id) => write!(f, "edge {id}"),
            RecordKey::Version(id) => write!(f, "version {id}"),
            RecordKey::Tag(name) => write!(f, "tag '{name}'"),
        }
    }
}

/// Ограничения уникальности, которые хранилище проверяет при коммите.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    TagName(String),
    TagVersion(VersionId),
    NodeEntry { node: NodeId, version: VersionId },
    EdgeEntry { edge: EdgeId, version: VersionId },
    Id(u64),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::TagName(name) => write!(f, "tag.name = '{name}'"),
            Constraint::TagVersion(v) => write!(f, "tag.version_id = {v}"),
            Constraint::NodeEntry { node, version } => {
                write!(f, "node_version(node_id = {node}, version_id = {version})")
            }
            Constraint::EdgeEntry { edge, version } => {
                write!(f, "edge_version(edge_id = {edge}, version_id = {version})")
            }
            Constraint::Id(id) => write!(f, "id = {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unknown {0}")]
    Missing(RecordKey),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(Constraint),

    #[error("Foreign key violated: {0}")]
    ForeignKey(String),

    #[error("Transaction error: {0}")]
    Tx(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Одна отложенная запись внутри транзакции.
///
/// Варианта, меняющего или удаляющего `NodeVersion`/`EdgeVersion`, нет:
/// замороженные записи только добавляются.
#[derive(Debug, Clone)]
pub enum Write {
    Tree(Tree),
    Node(Node),
    Edge(Edge),
    Version(Version),
    NodeVersion(NodeVersion),
    EdgeVersion(EdgeVersion),
    Tag(Tag),
    NodeData { id: NodeId, data: Value },
    EdgeData { id: EdgeId, data: Value },
}

/// Хэндл транзакции. Копит записи, хранилище применяет их целиком при `commit_tx`.
#[derive(Debug)]
pub struct TxHandle {
    pub id: u64,
    writes: Vec<Write>,
}

impl TxHandle {
    pub fn new(id: u64) -> Self {
        Self { id, writes: Vec::new() }
    }

    pub fn stage(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Транзакционное хранилище, которое реализует коллаборатор персистентности.
///
/// Все методы берут `&self`: реализация должна быть безопасна при конкурентных вызовах.
/// `commit_tx` либо применяет всю пачку записей, либо не применяет ничего.
pub trait GraphStorage: Send + Sync {
    /// Следующее значение общей последовательности идентификаторов.
    fn next_id(&self) -> Result<u64>;

    fn load_tree(&self, id: TreeId) -> Result<Tree>;
    fn list_trees(&self) -> Result<Vec<Tree>>;

    fn load_node(&self, id: NodeId) -> Result<Node>;
    fn load_edge(&self, id: EdgeId) -> Result<Edge>;

    fn load_version(&self, id: VersionId) -> Result<Version>;
    fn list_versions(&self, tree: TreeId) -> Result<Vec<Version>>;

    /// Поиск тега по имени в глобальном пространстве имён.
    fn find_tag(&self, name: &str) -> Result<Option<Tag>>;
    fn tag_of_version(&self, version: VersionId) -> Result<Option<Tag>>;
    fn list_tags(&self, tree: TreeId) -> Result<Vec<Tag>>;

    /// Согласованный срез живого графа дерева (под одной блокировкой).
    fn live_graph(&self, tree: TreeId) -> Result<LiveGraph>;

    /// Версия и все её записи, рёбра вместе с концами.
    fn frozen_version(&self, version: VersionId) -> Result<FrozenVersion>;

    fn begin_tx(&self) -> Result<TxHandle>;
    fn commit_tx(&self, tx: TxHandle) -> Result<()>;
    fn rollback_tx(&self, tx: TxHandle) -> Result<()>;

    /// Явное удаление дерева и всего, чем оно владеет. Каскадов "по умолчанию" нет.
    fn purge_tree(&self, tree: TreeId) -> Result<PurgeReport>;
}
