use serde::{Serialize, Deserialize};

/// Настройки движка версий.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Требовать, чтобы оба конца ребра, добавляемого в версию, уже имели
    /// записи в этой версии. По умолчанию концы ищутся среди живых нод дерева.
    pub strict_edge_endpoints: bool,

    /// Ограничение глубины поиска пути (в рёбрах). `None` = без ограничения.
    pub max_path_depth: Option<usize>,
}

impl EngineConfig {
    pub fn strict() -> Self {
        Self { strict_edge_endpoints: true, ..Self::default() }
    }
}
