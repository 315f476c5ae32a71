/// 任务数据持久化（JSON 快照）
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{Task, TaskType};
use crate::store::TaskStore;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub task_types: Vec<TaskType>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            task_types: Vec::new(),
            tasks: Vec::new(),
        }
    }
}

impl Snapshot {
    pub fn of(store: &TaskStore) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            task_types: store.task_types().to_vec(),
            tasks: store.tasks().to_vec(),
        }
    }
}

/// 获取默认数据文件路径
/// Linux: ~/.local/share/duetask/tasks.json
/// macOS: ~/Library/Application Support/duetask/tasks.json
/// Windows: %APPDATA%\duetask\tasks.json
pub fn default_data_path() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().context("Failed to get user directories")?;
    Ok(dirs.data_dir().join("duetask").join("tasks.json"))
}

/// 从文件加载快照，文件不存在时返回空快照
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    if !path.exists() {
        return Ok(Snapshot::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if snapshot.version > SNAPSHOT_VERSION {
        anyhow::bail!(
            "{} was written by a newer version (snapshot v{})",
            path.display(),
            snapshot.version
        );
    }

    Ok(snapshot)
}

/// 保存快照到文件
pub fn save_snapshot(path: &Path, store: &TaskStore) -> Result<()> {
    // 确保目录存在
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(&Snapshot::of(store))?;

    // 先写临时文件再重命名，避免写到一半留下损坏的数据
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}
