use std::sync::Arc;
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{Conflict, Error, NotFound, Result, Validation};
use crate::storage::{Constraint, GraphStorage, StorageError, TxHandle, Write};
use crate::types::{Tag, TagId, TreeId, Version, VersionId};

/// Привязка имён к версиям.
///
/// Имена тегов образуют одно глобальное пространство: `find` ищет только по имени,
/// без учёта дерева. Уникальность имени и связь 1:1 тег-версия окончательно
/// проверяются хранилищем при коммите, поэтому из конкурентных попыток создать
/// один и тот же тег проходит ровно одна, остальные получают `TagAlreadyExists`.
#[derive(Clone)]
pub struct TagRegistry {
    storage: Arc<dyn GraphStorage>,
}

impl TagRegistry {
    pub fn new(storage: Arc<dyn GraphStorage>) -> Self {
        Self { storage }
    }

    /// Ищет тег в глобальном пространстве имён.
    pub fn find(&self, name: &str) -> Result<Tag> {
        self.storage
            .find_tag(name)?
            .ok_or_else(|| NotFound::Tag(name.to_string()).into())
    }

    /// Ищет тег, принадлежащий конкретному дереву. Тег чужого дерева считается отсутствующим.
    pub fn find_in_tree(&self, tree: TreeId, name: &str) -> Result<Tag> {
        match self.storage.find_tag(name)? {
            Some(tag) if tag.tree_id == tree => Ok(tag),
            _ => Err(NotFound::Tag(name.to_string()).into()),
        }
    }

    pub fn tag_of(&self, version: VersionId) -> Result<Option<Tag>> {
        Ok(self.storage.tag_of_version(version)?)
    }

    /// Теги дерева в порядке создания.
    pub fn tags(&self, tree: TreeId) -> Result<Vec<Tag>> {
        self.storage.load_tree(tree)?;
        Ok(self.storage.list_tags(tree)?)
    }

    /// Кладёт тег в транзакцию после предварительных проверок.
    ///
    /// Проверки здесь дают понятную ошибку заранее; гонку между ними и коммитом
    /// закрывает ограничение уникальности хранилища.
    pub fn stage_bind(
        &self,
        tx: &mut TxHandle,
        tree: TreeId,
        name: &str,
        description: Option<String>,
        version: &Version,
    ) -> Result<Tag> {
        if version.tree_id != tree {
            return Err(Validation::VersionNotInTree { version: version.id, tree }.into());
        }
        if self.storage.find_tag(name)?.is_some() {
            return Err(Conflict::TagAlreadyExists(name.to_string()).into());
        }
        if let Some(existing) = self.storage.tag_of_version(version.id)? {
            let tag = existing.name;
            return Err(Conflict::VersionAlreadyTagged { version: version.id, tag }.into());
        }

        let tag = Tag {
            id: TagId(self.storage.next_id()?),
            tree_id: tree,
            name: name.to_string(),
            description,
            version_id: version.id,
            created_at: Utc::now(),
        };
        tx.stage(Write::Tag(tag.clone()));

        debug!(tag = %tag.name, version = %version.id, "tag staged");
        Ok(tag)
    }

    /// Коммитит транзакцию с тегом, переводя нарушения уникальности в конфликты.
    pub fn commit(&self, tx: TxHandle) -> Result<()> {
        let tx_id = tx.id;
        match self.storage.commit_tx(tx) {
            Ok(()) => Ok(()),
            Err(StorageError::UniqueViolation(Constraint::TagVersion(version))) => {
                warn!(tx = tx_id, version = %version, "lost race for version tag");
                let tag = self
                    .storage
                    .tag_of_version(version)?
                    .map(|t| t.name)
                    .unwrap_or_default();
                Err(Conflict::VersionAlreadyTagged { version, tag }.into())
            }
            Err(err) => {
                let err = Error::from(err);
                if err.is_conflict() {
                    warn!(tx = tx_id, error = %err, "tag commit rejected");
                }
                Err(err)
            }
        }
    }
}
