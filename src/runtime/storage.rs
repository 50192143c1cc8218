use crate::runtime::engine::Engine;
use crate::runtime::handler::EventHandler;
use crate::runtime::variables::VariablesSnapshot;
use anyhow::{Result, Context as AnyhowContext};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, Deserialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Execution counters of one saveable node, keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub execution_count: u32,
    pub finished_count: u32,
}

/// Everything the engine exposes for saving a story's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub variables: VariablesSnapshot,
}

impl Engine {
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            nodes: self.nodes()
                .filter(|n| n.saveable)
                .map(|n| NodeSnapshot {
                    name: n.name().to_string(),
                    execution_count: n.execution_count,
                    finished_count: n.finished_count,
                })
                .collect(),
            variables: self.variables.snapshot(),
        }
    }

    /// Applies saved counters and variables, then recomputes group completion
    /// and lock flags. Conditional handlers are re-armed. Unknown node names
    /// are skipped.
    pub fn restore(&mut self, snapshot: &EngineSnapshot) {
        for saved in &snapshot.nodes {
            let Some(id) = self.find_node(&saved.name) else {
                warn!(node = %saved.name, "Saved node no longer exists");
                continue;
            };
            if let Some(node) = self.node_mut(id) {
                node.execution_count = saved.execution_count;
                node.finished_count = saved.finished_count;
                if let Some(EventHandler::Conditional(handler)) = node.handler.as_mut() {
                    handler.reset();
                }
            }
        }
        self.variables.restore(&snapshot.variables);
        self.rebuild_groups();
        self.refresh_all_locks();
        info!(nodes = snapshot.nodes.len(), "Snapshot restored");
    }
}

/// Where snapshots are written; the engine itself never does I/O.
#[async_trait]
pub trait SaveStore: Send + Sync {
    async fn save(&self, slot: &str, snapshot: &EngineSnapshot) -> Result<()>;
    async fn load(&self, slot: &str) -> Result<Option<EngineSnapshot>>;
    async fn delete(&self, slot: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemorySaveStore {
    slots: DashMap<String, EngineSnapshot>,
}

impl InMemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SaveStore for InMemorySaveStore {
    async fn save(&self, slot: &str, snapshot: &EngineSnapshot) -> Result<()> {
        self.slots.insert(slot.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, slot: &str) -> Result<Option<EngineSnapshot>> {
        Ok(self.slots.get(slot).map(|s| s.value().clone()))
    }

    async fn delete(&self, slot: &str) -> Result<()> {
        self.slots.remove(slot);
        Ok(())
    }
}

/// One JSON file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileSaveStore {
    dir: PathBuf,
}

impl FileSaveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slot))
    }
}

#[async_trait]
impl SaveStore for FileSaveStore {
    async fn save(&self, slot: &str, snapshot: &EngineSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
            .with_context(|| format!("Failed to create save directory {}", self.dir.display()))?;
        let path = self.path(slot);
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&path, json).await
            .with_context(|| format!("Failed to write save file {}", path.display()))?;
        Ok(())
    }

    async fn load(&self, slot: &str) -> Result<Option<EngineSnapshot>> {
        let path = self.path(slot);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read save file {}", path.display())),
        };
        let snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse save file {}", path.display()))?;
        Ok(Some(snapshot))
    }

    async fn delete(&self, slot: &str) -> Result<()> {
        let path = self.path(slot);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete save file {}", path.display())),
        }
    }
}
