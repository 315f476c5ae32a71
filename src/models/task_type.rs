use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskTypeId = Uuid;

/// 任务分类（名称 + 图标 + 颜色）
///
/// `icon` and `color` are opaque tokens for whatever renders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskType {
    pub id: TaskTypeId,
    pub name: String,
    pub icon: String,
    pub color: String,
}

impl TaskType {
    pub fn new(name: impl Into<String>, icon: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            icon: icon.into(),
            color: color.into(),
        }
    }

    /// 默认分类目录
    pub fn defaults() -> Vec<TaskType> {
        vec![
            TaskType::new("Work", "briefcase", "blue"),
            TaskType::new("Personal", "person", "green"),
            TaskType::new("Shopping", "cart", "purple"),
            TaskType::new("Health", "heart", "red"),
        ]
    }
}
