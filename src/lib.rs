//! Due-date driven task tracking.
//!
//! [`store::TaskStore`] owns the task list and keeps it sorted by priority and
//! due date. Each open task's status comes from [`models::derive_status`].
//! Reminders go through a [`notify::ReminderScheduler`], and
//! [`refresh::RefreshTimer`] keeps statuses current while a process runs.

pub mod cli;
pub mod config;
pub mod models;
pub mod notify;
pub mod refresh;
pub mod storage;
pub mod store;

pub use models::{NewTask, Priority, Task, TaskId, TaskStatus, TaskType, TaskTypeId, derive_status};
pub use notify::{LogScheduler, NoopScheduler, ReminderRequest, ReminderScheduler};
pub use refresh::{RefreshTimer, RefreshTrigger, apply_trigger};
pub use store::{StoreError, StoreEvent, TaskStore};
