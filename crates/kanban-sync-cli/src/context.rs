use anyhow::Context;
use kanban_sync_core::SyncConfig;
use kanban_sync_domain::Snapshot;
use std::path::{Path, PathBuf};

pub struct CliContext {
    pub config: SyncConfig,
    pub config_path: Option<PathBuf>,
}

impl CliContext {
    /// An explicit config path must load; the default location falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => {
                let config = SyncConfig::load_from(path)
                    .with_context(|| format!("failed to load config {}", path.display()))?;
                Ok(Self {
                    config,
                    config_path: Some(path.to_path_buf()),
                })
            }
            None => Ok(Self {
                config: SyncConfig::load(),
                config_path: SyncConfig::config_path().filter(|path| path.exists()),
            }),
        }
    }
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    Snapshot::from_json(&text).with_context(|| format!("invalid snapshot {}", path.display()))
}

pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    std::fs::write(path, snapshot.to_json_pretty()?)
        .with_context(|| format!("failed to write snapshot {}", path.display()))
}

/// Non-blank lines of an event stream, in file order.
pub fn read_event_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read events {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
