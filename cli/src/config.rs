use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use tv_core::EngineConfig;

pub const CONFIG_FILE: &str = "config.toml";

/// Шаблон, который `init` кладёт в хранилище.
pub const DEFAULT_CONFIG: &str = "\
# Концы ребра, добавляемого в версию, должны уже быть записаны в этой версии.
strict_edge_endpoints = false

# Ограничение глубины поиска пути (в рёбрах).
# max_path_depth = 64
";

/// Читает `<store>/config.toml`; без файла действуют значения по умолчанию.
pub fn load(store: &Path) -> Result<EngineConfig> {
    let path = store.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

pub fn write_default(store: &Path) -> Result<()> {
    let path = store.join(CONFIG_FILE);
    if path.exists() {
        return Ok(());
    }
    fs::write(&path, DEFAULT_CONFIG).with_context(|| format!("Failed to write {}", path.display()))
}
