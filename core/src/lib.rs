// core/src/lib.rs
pub mod types;
pub mod storage;
pub mod state;
pub mod memory;
pub mod error;
pub mod config;
pub mod graph_store;
pub mod snapshot;
pub mod tag_registry;
pub mod version_manager;
pub mod traversal;
pub mod dispatcher;

pub use types::*;
pub use config::EngineConfig;
pub use error::{Conflict, Error, NotFound, Result, Validation};
pub use graph_store::GraphStore;
pub use memory::MemoryStorage;
pub use snapshot::{SnapshotEngine, SnapshotStats};
pub use tag_registry::TagRegistry;
pub use traversal::{PathStep, TraversalEngine};
pub use version_manager::VersionManager;
pub use dispatcher::{CommandDispatcher, Command, CmdResult, VersionRef};
