use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::priority::Priority;
use super::status::{TaskStatus, derive_status};
use super::task_type::TaskTypeId;

pub type TaskId = Uuid;

/// 一个待办任务
///
/// `status` and `completed_date` are only changed through the store, which
/// keeps `completed_date` set exactly when the task is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub task_type: TaskTypeId,
    status: TaskStatus,
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_date: Option<DateTime<Utc>>,
}

/// Everything the caller supplies when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub task_type: TaskTypeId,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub reminder_date: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, due_date: DateTime<Utc>, task_type: TaskTypeId) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_date,
            task_type,
            priority: Priority::default(),
            tags: BTreeSet::new(),
            reminder_date: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn reminder(mut self, at: DateTime<Utc>) -> Self {
        self.reminder_date = Some(at);
        self
    }
}

impl Task {
    pub(crate) fn create(draft: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: draft.title,
            description: draft.description,
            due_date: draft.due_date,
            task_type: draft.task_type,
            status: derive_status(draft.due_date, now),
            priority: draft.priority,
            tags: draft.tags,
            completed_date: None,
            reminder_date: draft.reminder_date,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn completed_date(&self) -> Option<DateTime<Utc>> {
        self.completed_date
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Short id used for display and prefix lookup.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_date = Some(now);
    }

    pub(crate) fn mark_open(&mut self, now: DateTime<Utc>) {
        self.status = derive_status(self.due_date, now);
        self.completed_date = None;
    }

    /// Re-derive the status of an open task. Returns true if it changed.
    pub(crate) fn rederive(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_completed() {
            return false;
        }
        let status = derive_status(self.due_date, now);
        if status == self.status {
            return false;
        }
        self.status = status;
        true
    }

    pub(crate) fn carry_lifecycle_from(&mut self, previous: &Task) {
        self.status = previous.status;
        self.completed_date = previous.completed_date;
    }

    /// Repair records loaded from disk so the completion invariant holds.
    pub(crate) fn normalize(&mut self, now: DateTime<Utc>) {
        match (self.status, self.completed_date) {
            (TaskStatus::Completed, None) => self.completed_date = Some(now),
            (TaskStatus::Completed, Some(_)) => {}
            (_, Some(_)) => self.completed_date = None,
            (_, None) => {}
        }
    }
}

/// Split a comma separated tag list, trimming entries and dropping empty ones.
pub fn parse_tags(input: &str) -> BTreeSet<String> {
    input
        .split(',')
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}
