pub mod json_storage;

pub use json_storage::JsonStorage;

/// Имя файла графа внутри каталога хранилища.
pub const GRAPH_FILE: &str = "graph.json";

/// Открывает (или создаёт) хранилище `<dir>/graph.json`.
pub fn open_dir(dir: impl AsRef<std::path::Path>) -> tv_core::storage::Result<JsonStorage> {
    JsonStorage::new(dir.as_ref().join(GRAPH_FILE))
}
