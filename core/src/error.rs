use thiserror::Error;

use crate::storage::{Constraint, RecordKey, StorageError};
use crate::types::{EdgeId, NodeId, TreeId, VersionId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotFound {
    #[error("tree {0} not found")]
    Tree(TreeId),

    #[error("tag '{0}' not found")]
    Tag(String),

    #[error("version {0} not found")]
    Version(VersionId),

    #[error("node {0} not found")]
    Node(NodeId),

    #[error("edge {0} not found")]
    Edge(EdgeId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Conflict {
    #[error("tag '{0}' already exists")]
    TagAlreadyExists(String),

    #[error("version {version} is already tagged as '{tag}'")]
    VersionAlreadyTagged { version: VersionId, tag: String },

    #[error("version already holds an entry for {0}")]
    EntryAlreadyExists(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Validation {
    #[error("node {node} is not an endpoint candidate in tree {tree}")]
    EndpointNotInTree { node: NodeId, tree: TreeId },

    #[error("node {node} does not belong to tree {tree}")]
    NodeNotInTree { node: NodeId, tree: TreeId },

    #[error("node {node} has no entry in version {version}")]
    NodeNotInVersion { node: NodeId, version: VersionId },

    #[error("version {version} does not belong to tree {tree}")]
    VersionNotInTree { version: VersionId, tree: TreeId },
}

/// Ошибка движка версий. Возвращается вызывающему синхронно, ничего не закоммичено.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error(transparent)]
    Validation(#[from] Validation),

    #[error("storage: {0}")]
    Storage(StorageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Missing(key) => Error::NotFound(match key {
                RecordKey::Tree(id) => NotFound::Tree(id),
                RecordKey::Node(id) => NotFound::Node(id),
                RecordKey::Edge(id) => NotFound::Edge(id),
                RecordKey::Version(id) => NotFound::Version(id),
                RecordKey::Tag(name) => NotFound::Tag(name),
            }),
            StorageError::UniqueViolation(Constraint::TagName(name)) => {
                Error::Conflict(Conflict::TagAlreadyExists(name))
            }
            StorageError::UniqueViolation(Constraint::TagVersion(version)) => {
                // имя конкурирующего тега хранилище не сообщает
                Error::Conflict(Conflict::VersionAlreadyTagged { version, tag: String::new() })
            }
            StorageError::UniqueViolation(constraint @ Constraint::NodeEntry { .. })
            | StorageError::UniqueViolation(constraint @ Constraint::EdgeEntry { .. }) => {
                Error::Conflict(Conflict::EntryAlreadyExists(constraint.to_string()))
            }
            other => Error::Storage(other),
        }
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}
