use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::fmt;
use chrono::{DateTime, Utc};

macro_rules! record_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<u64> for $name {
                fn from(raw: u64) -> Self {
                    $name(raw)
                }
            }
        )*
    };
}

record_id!(TreeId, NodeId, EdgeId, VersionId, NodeVersionId, EdgeVersionId, TagId);

/// Именованное пространство графа. Владеет нодами, рёбрами, версиями и тегами.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub id: TreeId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Живая вершина графа. `data` меняется на месте, идентичность сохраняется между версиями.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub tree_id: TreeId,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// Живое направленное ребро `incoming_node_id -> outgoing_node_id`.
/// Концы неизменны после создания, `data` меняется.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub incoming_node_id: NodeId,
    pub outgoing_node_id: NodeId,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// Контейнер замороженных записей. Набор записей только дописывается.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub tree_id: TreeId,
    pub parent_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

/// Замороженный снимок данных ноды в конкретной версии.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub id: NodeVersionId,
    pub node_id: NodeId,
    pub version_id: VersionId,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// Замороженный снимок данных ребра в конкретной версии.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeVersion {
    pub id: EdgeVersionId,
    pub edge_id: EdgeId,
    pub version_id: VersionId,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// Уникальное имя, привязанное ровно к одной версии.
/// Пространство имён тегов глобальное, не в пределах дерева.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub tree_id: TreeId,
    pub name: String,
    pub description: Option<String>,
    pub version_id: VersionId,
    pub created_at: DateTime<Utc>,
}

/// EdgeVersion вместе с концами ребра.
/// Концы берутся из живого `Edge`, они неизменны, поэтому денормализация безопасна.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenEdge {
    pub entry: EdgeVersion,
    pub incoming_node_id: NodeId,
    pub outgoing_node_id: NodeId,
}

impl FrozenEdge {
    pub fn edge_id(&self) -> EdgeId {
        self.entry.edge_id
    }

    pub fn touches(&self, node_id: NodeId) -> bool {
        self.incoming_node_id == node_id || self.outgoing_node_id == node_id
    }
}

/// Полное содержимое одной версии: запись версии и все её замороженные записи в порядке вставки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenVersion {
    pub version: Version,
    pub nodes: Vec<NodeVersion>,
    pub edges: Vec<FrozenEdge>,
}

/// Текущее живое состояние дерева: ноды и рёбра, оба конца которых лежат в этом дереве.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Сколько записей удалено явной операцией очистки дерева.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub nodes: usize,
    pub edges: usize,
    pub versions: usize,
    pub node_versions: usize,
    pub edge_versions: usize,
    pub tags: usize,
}
