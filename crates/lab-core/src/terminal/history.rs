//! Persisted command history
//!
//! Stored as a JSON array of strings, oldest first. A missing or unreadable
//! file starts an empty history.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
    path: Option<PathBuf>,
    /// Bumped on every recorded command
    revision: u64,
}

impl CommandHistory {
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            path: None,
            revision: 0,
        }
    }

    /// Load from `path`, keeping the newest `capacity` entries
    pub fn load(path: impl AsRef<Path>, capacity: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut history = Self {
            path: Some(path.clone()),
            ..Self::in_memory(capacity)
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(entries) => {
                    for entry in entries {
                        history.push_entry(entry);
                    }
                    debug!(path = %path.display(), entries = history.len(), "Loaded command history");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring malformed history file"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read history file"),
        }
        history
    }

    fn push_entry(&mut self, entry: String) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Append a command. Blank lines are ignored.
    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.push_entry(line.to_string());
        self.revision += 1;
    }

    /// Rewrite the history file. No-op for in-memory histories.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::in_memory(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_capacity_keeps_newest() {
        let mut history = CommandHistory::in_memory(3);
        for cmd in ["a", "b", "c", "d"] {
            history.push(cmd);
        }
        assert_eq!(history.entries(), vec!["b", "c", "d"]);
        assert_eq!(history.revision(), 4);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut history = CommandHistory::in_memory(3);
        history.push("   ");
        assert!(history.is_empty());
        assert_eq!(history.revision(), 0);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut history = CommandHistory::load(&path, 50);
        assert!(history.is_empty());
        history.push("kubectl get pods");
        history.push("deploy --weight 20");
        history.save().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec!["kubectl get pods", "deploy --weight 20"]);

        let reloaded = CommandHistory::load(&path, 1);
        assert_eq!(reloaded.entries(), vec!["deploy --weight 20"]);
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();

        let history = CommandHistory::load(&path, 50);
        assert!(history.is_empty());
        assert_eq!(history.path(), Some(path.as_path()));
    }
}
