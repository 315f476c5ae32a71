/// 提醒调度（外部协作者）
use chrono::{DateTime, Local, Utc};
use tracing::{info, warn};

use crate::models::{Task, TaskId};

/// What a reminder backend needs to raise one alert for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderRequest {
    pub task_id: TaskId,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub remind_at: DateTime<Utc>,
}

impl ReminderRequest {
    /// Build a request for `task`, or `None` if it has no reminder.
    pub fn for_task(task: &Task) -> Option<Self> {
        let remind_at = task.reminder_date?;
        Some(Self {
            task_id: task.id(),
            title: task.title.clone(),
            due_date: task.due_date,
            remind_at,
        })
    }

    pub fn headline(&self) -> &'static str {
        "Task Reminder"
    }

    pub fn body(&self) -> String {
        format!(
            "Task '{}' is due {}",
            self.title,
            self.due_date.with_timezone(&Local).format("%b %-d, %Y %H:%M")
        )
    }
}

/// Fire-and-forget reminder backend.
///
/// Implementations log their own failures; nothing is reported back to the
/// store.
pub trait ReminderScheduler: Send + Sync {
    fn schedule(&self, request: &ReminderRequest);
    fn cancel(&self, task_id: TaskId);
}

/// Writes reminders to the log instead of a platform notification center.
#[derive(Debug, Default)]
pub struct LogScheduler;

impl ReminderScheduler for LogScheduler {
    fn schedule(&self, request: &ReminderRequest) {
        if request.remind_at > request.due_date {
            warn!(
                task_id = %request.task_id,
                remind_at = %request.remind_at,
                due_date = %request.due_date,
                "reminder is set after the due date"
            );
        }
        info!(
            task_id = %request.task_id,
            remind_at = %request.remind_at,
            headline = request.headline(),
            body = %request.body(),
            "scheduled reminder"
        );
    }

    fn cancel(&self, task_id: TaskId) {
        info!(task_id = %task_id, "cancelled reminder");
    }
}

/// 不发送任何提醒
#[derive(Debug, Default)]
pub struct NoopScheduler;

impl ReminderScheduler for NoopScheduler {
    fn schedule(&self, _request: &ReminderRequest) {}

    fn cancel(&self, _task_id: TaskId) {}
}
