use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 距离截止时间多久以内算作 "即将到期"（小时）
pub const CLOSE_TO_DUE_HOURS: i64 = 24;

/// 任务生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// Not produced by any store operation yet; kept so stored data and
    /// filters can name it.
    InProgress,
    CloseToDueDate,
    Overdue,
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::CloseToDueDate,
        TaskStatus::Overdue,
        TaskStatus::Completed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::CloseToDueDate => "close_to_due_date",
            TaskStatus::Overdue => "overdue",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::CloseToDueDate => "Close to Due Date",
            TaskStatus::Overdue => "Overdue",
            TaskStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.display())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" | "inprogress" | "doing" => Ok(TaskStatus::InProgress),
            "close_to_due" | "close_to_due_date" | "closetoduedate" => {
                Ok(TaskStatus::CloseToDueDate)
            }
            "overdue" => Ok(TaskStatus::Overdue),
            "completed" | "done" => Ok(TaskStatus::Completed),
            other => Err(format!("Unknown status: {}", other)),
        }
    }
}

/// Map a due date onto the status it implies at `now`.
///
/// Never yields `InProgress` or `Completed`; those only come from explicit
/// user action.
pub fn derive_status(due_date: DateTime<Utc>, now: DateTime<Utc>) -> TaskStatus {
    if due_date < now {
        return TaskStatus::Overdue;
    }
    if due_date - now <= Duration::hours(CLOSE_TO_DUE_HOURS) {
        return TaskStatus::CloseToDueDate;
    }
    TaskStatus::Pending
}
