/// 内存任务仓库：排序、状态推导和增删改操作
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::{NewTask, Task, TaskId, TaskStatus, TaskType, TaskTypeId};
use crate::notify::{ReminderRequest, ReminderScheduler};
use crate::storage::Snapshot;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("task title must not be empty")]
    EmptyTitle,
    #[error("task type {0} is not in the catalog")]
    UnknownTaskType(TaskTypeId),
}

/// Published after a mutation actually changed the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    TaskAdded(TaskId),
    TaskUpdated(TaskId),
    TaskDeleted(TaskId),
    TaskCompleted(TaskId),
    TaskReverted(TaskId),
    StatusesRefreshed { changed: usize },
    TaskTypeAdded(TaskTypeId),
}

pub struct TaskStore {
    tasks: Vec<Task>,
    task_types: Vec<TaskType>,
    scheduler: Box<dyn ReminderScheduler>,
    events: broadcast::Sender<StoreEvent>,
}

impl TaskStore {
    /// Empty store with the default task type catalog.
    pub fn new(scheduler: Box<dyn ReminderScheduler>) -> Self {
        Self::with_task_types(TaskType::defaults(), scheduler)
    }

    pub fn with_task_types(task_types: Vec<TaskType>, scheduler: Box<dyn ReminderScheduler>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut store = Self {
            tasks: Vec::new(),
            task_types: Vec::new(),
            scheduler,
            events,
        };
        for task_type in task_types {
            store.add_task_type(task_type);
        }
        store
    }

    /// Rebuild a store from a saved snapshot, bringing statuses up to `now`.
    pub fn from_snapshot(
        snapshot: Snapshot,
        scheduler: Box<dyn ReminderScheduler>,
        now: DateTime<Utc>,
    ) -> Self {
        let task_types = if snapshot.task_types.is_empty() {
            TaskType::defaults()
        } else {
            snapshot.task_types
        };
        let mut store = Self::with_task_types(task_types, scheduler);

        for mut task in snapshot.tasks {
            if store.task_type(task.task_type).is_none() {
                warn!(task_id = %task.id(), task_type = %task.task_type, "task refers to an unknown task type");
            }
            task.normalize(now);
            task.rederive(now);
            store.tasks.push(task);
        }
        store.sort_tasks();
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_types(&self) -> &[TaskType] {
        &self.task_types
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn task_type(&self, id: TaskTypeId) -> Option<&TaskType> {
        self.task_types.iter().find(|t| t.id == id)
    }

    pub fn task_type_by_name(&self, name: &str) -> Option<&TaskType> {
        self.task_types
            .iter()
            .find(|t| t.name == name)
            .or_else(|| self.task_types.iter().find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub fn add(&mut self, draft: NewTask, now: DateTime<Utc>) -> Result<Task, StoreError> {
        self.validate(&draft.title, draft.task_type)?;

        let task = Task::create(draft, now);
        debug!(task_id = %task.id(), status = %task.status(), "adding task");
        self.tasks.push(task.clone());
        self.sort_tasks();

        if let Some(request) = ReminderRequest::for_task(&task) {
            self.scheduler.schedule(&request);
        }

        self.publish(StoreEvent::TaskAdded(task.id()));
        Ok(task)
    }

    /// Replace the stored task that has the same id.
    ///
    /// Status and completion date stay with the stored task; an open task has
    /// its status re-derived in case the due date moved.
    pub fn update(&mut self, mut task: Task, now: DateTime<Utc>) -> Result<(), StoreError> {
        let index = self.index_of(task.id())?;
        self.validate(&task.title, task.task_type)?;

        let previous = &self.tasks[index];
        let had_reminder = previous.reminder_date.is_some();
        task.carry_lifecycle_from(previous);
        task.rederive(now);

        if task.reminder_date.is_some() {
            self.scheduler.cancel(task.id());
            if !task.is_completed() {
                if let Some(request) = ReminderRequest::for_task(&task) {
                    self.scheduler.schedule(&request);
                }
            }
        } else if had_reminder {
            self.scheduler.cancel(task.id());
        }

        let id = task.id();
        debug!(task_id = %id, "updating task");
        self.tasks[index] = task;
        self.sort_tasks();
        self.publish(StoreEvent::TaskUpdated(id));
        Ok(())
    }

    pub fn delete(&mut self, id: TaskId) -> Result<Task, StoreError> {
        let index = self.index_of(id)?;
        self.scheduler.cancel(id);
        let task = self.tasks.remove(index);
        debug!(task_id = %id, "deleted task");
        self.publish(StoreEvent::TaskDeleted(id));
        Ok(task)
    }

    /// Mark a task completed. Returns false if it already was, leaving its
    /// completion date untouched.
    pub fn complete(&mut self, id: TaskId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let index = self.index_of(id)?;
        if self.tasks[index].is_completed() {
            return Ok(false);
        }
        self.tasks[index].mark_completed(now);
        self.scheduler.cancel(id);
        debug!(task_id = %id, "completed task");
        self.sort_tasks();
        self.publish(StoreEvent::TaskCompleted(id));
        Ok(true)
    }

    /// Undo a completion. Returns false if the task was not completed.
    /// A reminder cancelled by `complete` is not restored.
    pub fn revert(&mut self, id: TaskId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let index = self.index_of(id)?;
        if !self.tasks[index].is_completed() {
            return Ok(false);
        }
        self.tasks[index].mark_open(now);
        debug!(task_id = %id, status = %self.tasks[index].status(), "reverted task");
        self.sort_tasks();
        self.publish(StoreEvent::TaskReverted(id));
        Ok(true)
    }

    /// Re-derive every open task's status. Returns true if anything changed.
    pub fn refresh_statuses(&mut self, now: DateTime<Utc>) -> bool {
        let changed = self
            .tasks
            .iter_mut()
            .map(|task| task.rederive(now))
            .filter(|&changed| changed)
            .count();

        if changed == 0 {
            return false;
        }

        info!(changed, "task statuses refreshed");
        self.sort_tasks();
        self.publish(StoreEvent::StatusesRefreshed { changed });
        true
    }

    /// Append a task type unless one with the same name already exists.
    pub fn add_task_type(&mut self, task_type: TaskType) -> bool {
        if self.task_types.iter().any(|t| t.name == task_type.name) {
            debug!(name = %task_type.name, "task type already exists");
            return false;
        }
        let id = task_type.id;
        self.task_types.push(task_type);
        self.publish(StoreEvent::TaskTypeAdded(id));
        true
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn tasks_for_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.status() == status).collect()
    }

    pub fn tasks_for_type(&self, task_type: TaskTypeId) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.task_type == task_type).collect()
    }

    pub fn tasks_with_tag(&self, tag: &str) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.tags.contains(tag)).collect()
    }

    pub fn overdue_tasks(&self) -> Vec<&Task> {
        self.tasks_for_status(TaskStatus::Overdue)
    }

    /// Open tasks that are not overdue and fall due within `days` of `now`.
    ///
    /// A window too large to represent is treated as unbounded.
    pub fn upcoming_tasks(&self, days: i64, now: DateTime<Utc>) -> Vec<&Task> {
        let horizon = Duration::try_days(days)
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.tasks
            .iter()
            .filter(|t| {
                t.status() != TaskStatus::Completed
                    && t.status() != TaskStatus::Overdue
                    && t.due_date <= horizon
            })
            .collect()
    }

    // ------------------------------------------------------------------

    fn validate(&self, title: &str, task_type: TaskTypeId) -> Result<(), StoreError> {
        if title.trim().is_empty() {
            return Err(StoreError::EmptyTitle);
        }
        if self.task_type(task_type).is_none() {
            return Err(StoreError::UnknownTaskType(task_type));
        }
        Ok(())
    }

    fn index_of(&self, id: TaskId) -> Result<usize, StoreError> {
        self.tasks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(StoreError::NotFound(id))
    }

    /// 优先级降序，截止时间升序；稳定排序保留插入顺序
    fn sort_tasks(&mut self) {
        self.tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.due_date.cmp(&b.due_date))
        });
    }

    fn publish(&self, event: StoreEvent) {
        // 没有订阅者时发送会失败，忽略即可
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use crate::notify::testing::{Call, RecordingScheduler};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
    }

    fn store() -> (TaskStore, RecordingScheduler) {
        let scheduler = RecordingScheduler::default();
        (TaskStore::new(Box::new(scheduler.clone())), scheduler)
    }

    fn work(store: &TaskStore) -> TaskTypeId {
        store.task_type_by_name("Work").unwrap().id
    }

    fn draft(store: &TaskStore, title: &str, due: DateTime<Utc>, priority: Priority) -> NewTask {
        NewTask::new(title, due, work(store)).priority(priority)
    }

    fn titles(store: &TaskStore) -> Vec<&str> {
        store.tasks().iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn test_priority_dominates_due_date() {
        let (mut store, _) = store();
        let now = now();
        store
            .add(draft(&store, "A", now + Duration::days(2), Priority::High), now)
            .unwrap();
        store
            .add(draft(&store, "B", now + Duration::hours(1), Priority::Low), now)
            .unwrap();
        assert_eq!(titles(&store), vec!["A", "B"]);
    }

    #[test]
    fn test_equal_priority_sorted_by_due_date_then_insertion() {
        let (mut store, _) = store();
        let now = now();
        let due = now + Duration::days(3);
        store.add(draft(&store, "later", due + Duration::hours(1), Priority::Medium), now).unwrap();
        store.add(draft(&store, "first", due, Priority::Medium), now).unwrap();
        store.add(draft(&store, "second", due, Priority::Medium), now).unwrap();
        store.add(draft(&store, "urgent", due + Duration::days(9), Priority::High), now).unwrap();
        assert_eq!(titles(&store), vec!["urgent", "first", "second", "later"]);
    }

    #[test]
    fn test_past_due_task_is_overdue_on_creation() {
        let (mut store, _) = store();
        let now = now();
        let task = store
            .add(draft(&store, "late", now - Duration::hours(1), Priority::Medium), now)
            .unwrap();
        assert_eq!(task.status(), TaskStatus::Overdue);
        assert_eq!(store.overdue_tasks().len(), 1);
    }

    #[test]
    fn test_add_rejects_invalid_drafts() {
        let (mut store, scheduler) = store();
        let now = now();
        let blank = draft(&store, "   ", now + Duration::days(1), Priority::Low);
        assert_eq!(store.add(blank, now), Err(StoreError::EmptyTitle));

        let stray = TaskType::new("Stray", "questionmark", "gray");
        let orphan = NewTask::new("orphan", now, stray.id);
        assert_eq!(store.add(orphan, now), Err(StoreError::UnknownTaskType(stray.id)));

        assert!(store.is_empty());
        assert!(scheduler.calls().is_empty());
    }

    #[test]
    fn test_add_schedules_reminder() {
        let (mut store, scheduler) = store();
        let now = now();
        let plain = store
            .add(draft(&store, "plain", now + Duration::days(2), Priority::Low), now)
            .unwrap();
        assert!(scheduler.calls().is_empty());

        let remind_at = now + Duration::days(1);
        let task = store
            .add(draft(&store, "remind", now + Duration::days(2), Priority::Low).reminder(remind_at), now)
            .unwrap();
        assert_ne!(plain.id(), task.id());
        assert_eq!(
            scheduler.calls(),
            vec![Call::Schedule(ReminderRequest::for_task(&task).unwrap())]
        );
    }

    #[test]
    fn test_complete_then_revert() {
        let (mut store, scheduler) = store();
        let now = now();
        let task = store
            .add(
                draft(&store, "report", now + Duration::hours(5), Priority::High)
                    .reminder(now + Duration::hours(4)),
                now,
            )
            .unwrap();
        scheduler.clear();

        let done_at = now + Duration::hours(1);
        assert!(store.complete(task.id(), done_at).unwrap());
        let stored = store.get(task.id()).unwrap();
        assert_eq!(stored.status(), TaskStatus::Completed);
        assert_eq!(stored.completed_date(), Some(done_at));
        assert_eq!(scheduler.calls(), vec![Call::Cancel(task.id())]);

        // 截止时间已过，撤销完成后应为 overdue
        let later = now + Duration::hours(6);
        assert!(store.revert(task.id(), later).unwrap());
        let stored = store.get(task.id()).unwrap();
        assert!(stored.completed_date().is_none());
        assert_eq!(stored.status(), TaskStatus::Overdue);
        // revert 不会重新安排提醒
        assert_eq!(scheduler.calls(), vec![Call::Cancel(task.id())]);
    }

    #[test]
    fn test_repeated_complete_and_revert_change_nothing() {
        let (mut store, scheduler) = store();
        let now = now();
        let task = store
            .add(draft(&store, "twice", now + Duration::days(2), Priority::Low), now)
            .unwrap();
        let mut events = store.subscribe();

        // 未完成的任务不能撤销
        assert!(!store.revert(task.id(), now).unwrap());
        assert_eq!(store.get(task.id()).unwrap(), &task);
        assert!(events.try_recv().is_err());

        assert!(store.complete(task.id(), now).unwrap());
        assert_eq!(events.try_recv(), Ok(StoreEvent::TaskCompleted(task.id())));
        scheduler.clear();

        // 再次完成不会覆盖完成时间
        let later = now + Duration::hours(3);
        assert!(!store.complete(task.id(), later).unwrap());
        assert_eq!(store.get(task.id()).unwrap().completed_date(), Some(now));
        assert!(events.try_recv().is_err());
        assert!(scheduler.calls().is_empty());
    }

    #[test]
    fn test_unknown_id_reports_not_found() {
        let (mut store, scheduler) = store();
        let mut events = store.subscribe();
        let now = now();
        let ghost = uuid::Uuid::new_v4();

        assert_eq!(store.complete(ghost, now), Err(StoreError::NotFound(ghost)));
        assert_eq!(store.revert(ghost, now), Err(StoreError::NotFound(ghost)));
        assert_eq!(store.delete(ghost), Err(StoreError::NotFound(ghost)));

        let detached = Task::create(draft(&store, "detached", now, Priority::Low), now);
        let detached_id = detached.id();
        assert_eq!(store.update(detached, now), Err(StoreError::NotFound(detached_id)));

        assert!(scheduler.calls().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_update_replaces_in_place_and_resorts() {
        let (mut store, _) = store();
        let now = now();
        let a = store
            .add(draft(&store, "a", now + Duration::days(1), Priority::Medium), now)
            .unwrap();
        store
            .add(draft(&store, "b", now + Duration::days(2), Priority::Medium), now)
            .unwrap();

        let mut edited = a.clone();
        edited.title = "a (moved)".to_string();
        edited.due_date = now + Duration::days(5);
        store.update(edited, now).unwrap();

        assert_eq!(titles(&store), vec!["b", "a (moved)"]);
        assert_eq!(store.get(a.id()).unwrap().status(), TaskStatus::Pending);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_keeps_completion() {
        let (mut store, _) = store();
        let now = now();
        let task = store
            .add(draft(&store, "done", now + Duration::days(1), Priority::Low), now)
            .unwrap();
        store.complete(task.id(), now).unwrap();

        // 使用旧快照更新不会把任务重新打开
        let mut stale = task.clone();
        stale.description = "notes".to_string();
        store.update(stale, now).unwrap();

        let stored = store.get(task.id()).unwrap();
        assert_eq!(stored.status(), TaskStatus::Completed);
        assert_eq!(stored.completed_date(), Some(now));
        assert_eq!(stored.description, "notes");
    }

    #[test]
    fn test_update_reschedules_or_cancels_reminder() {
        let (mut store, scheduler) = store();
        let now = now();
        let task = store
            .add(
                draft(&store, "call", now + Duration::days(3), Priority::Low)
                    .reminder(now + Duration::days(1)),
                now,
            )
            .unwrap();
        scheduler.clear();

        let mut moved = task.clone();
        moved.reminder_date = Some(now + Duration::days(2));
        store.update(moved.clone(), now).unwrap();
        assert_eq!(
            scheduler.calls(),
            vec![
                Call::Cancel(task.id()),
                Call::Schedule(ReminderRequest::for_task(&moved).unwrap()),
            ]
        );

        scheduler.clear();
        let mut cleared = moved;
        cleared.reminder_date = None;
        store.update(cleared, now).unwrap();
        assert_eq!(scheduler.calls(), vec![Call::Cancel(task.id())]);
    }

    #[test]
    fn test_delete_cancels_reminder() {
        let (mut store, scheduler) = store();
        let now = now();
        let task = store
            .add(draft(&store, "gone", now + Duration::days(3), Priority::Low), now)
            .unwrap();
        let removed = store.delete(task.id()).unwrap();
        assert_eq!(removed.id(), task.id());
        assert!(store.is_empty());
        assert_eq!(scheduler.calls(), vec![Call::Cancel(task.id())]);
    }

    #[test]
    fn test_refresh_statuses_is_idempotent() {
        let (mut store, _) = store();
        let now = now();
        let soon = store
            .add(draft(&store, "soon", now + Duration::hours(30), Priority::Low), now)
            .unwrap();
        let done = store
            .add(draft(&store, "done", now + Duration::hours(2), Priority::Low), now)
            .unwrap();
        store.complete(done.id(), now).unwrap();
        assert_eq!(soon.status(), TaskStatus::Pending);

        let mut events = store.subscribe();
        let later = now + Duration::hours(10);
        assert!(store.refresh_statuses(later));
        assert_eq!(store.get(soon.id()).unwrap().status(), TaskStatus::CloseToDueDate);
        // 已完成的任务不参与重新计算
        assert_eq!(store.get(done.id()).unwrap().status(), TaskStatus::Completed);
        assert_eq!(events.try_recv(), Ok(StoreEvent::StatusesRefreshed { changed: 1 }));

        assert!(!store.refresh_statuses(later));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_add_task_type_deduplicates_by_name() {
        let (mut store, _) = store();
        let before = store.task_types().len();
        assert!(store.add_task_type(TaskType::new("Errands", "bag", "teal")));
        assert!(!store.add_task_type(TaskType::new("Errands", "cart", "pink")));
        assert!(!store.add_task_type(TaskType::new("Work", "briefcase", "blue")));
        assert_eq!(store.task_types().len(), before + 1);
        assert_eq!(
            store.task_types().iter().filter(|t| t.name == "Work").count(),
            1
        );
    }

    #[test]
    fn test_queries() {
        let (mut store, _) = store();
        let now = now();
        let personal = store.task_type_by_name("personal").unwrap().id;

        let overdue = store
            .add(draft(&store, "overdue", now - Duration::days(1), Priority::Low).tags(["home"]), now)
            .unwrap();
        let soon = store
            .add(NewTask::new("soon", now + Duration::days(2), personal).tags(["home", "Call"]), now)
            .unwrap();
        let far = store
            .add(draft(&store, "far", now + Duration::days(20), Priority::Low), now)
            .unwrap();
        let done = store
            .add(draft(&store, "done", now + Duration::days(1), Priority::Low), now)
            .unwrap();
        store.complete(done.id(), now).unwrap();

        let ids = |tasks: Vec<&Task>| tasks.iter().map(|t| t.id()).collect::<Vec<_>>();

        assert_eq!(ids(store.tasks_for_type(personal)), vec![soon.id()]);
        assert_eq!(ids(store.tasks_with_tag("home")).len(), 2);
        assert!(store.tasks_with_tag("call").is_empty());
        assert_eq!(ids(store.overdue_tasks()), vec![overdue.id()]);
        assert_eq!(ids(store.tasks_for_status(TaskStatus::Pending)), vec![soon.id(), far.id()]);
        assert_eq!(ids(store.tasks_for_status(TaskStatus::Completed)), vec![done.id()]);
        assert!(store.tasks_for_status(TaskStatus::InProgress).is_empty());
        assert_eq!(ids(store.upcoming_tasks(7, now)), vec![soon.id()]);
        assert_eq!(ids(store.upcoming_tasks(30, now)), vec![soon.id(), far.id()]);
    }

    #[test]
    fn test_upcoming_window_is_inclusive() {
        let (mut store, _) = store();
        let now = now();
        let edge = store
            .add(draft(&store, "edge", now + Duration::days(7), Priority::Low), now)
            .unwrap();
        let past_edge = store
            .add(
                draft(&store, "past edge", now + Duration::days(7) + Duration::seconds(1), Priority::Low),
                now,
            )
            .unwrap();

        let upcoming: Vec<TaskId> = store.upcoming_tasks(7, now).iter().map(|t| t.id()).collect();
        assert_eq!(upcoming, vec![edge.id()]);
        assert!(!upcoming.contains(&past_edge.id()));
    }

    #[test]
    fn test_upcoming_with_huge_window_does_not_overflow() {
        let (mut store, _) = store();
        let now = now();
        let far = store
            .add(draft(&store, "far", now + Duration::days(3650), Priority::Low), now)
            .unwrap();

        for days in [200_000_000, i64::MAX] {
            let upcoming: Vec<TaskId> = store.upcoming_tasks(days, now).iter().map(|t| t.id()).collect();
            assert_eq!(upcoming, vec![far.id()]);
        }
        assert!(store.upcoming_tasks(-1, now).is_empty());
    }

    #[test]
    fn test_events_follow_mutations() {
        let (mut store, _) = store();
        let mut events = store.subscribe();
        let now = now();
        let task = store
            .add(draft(&store, "evt", now + Duration::days(4), Priority::Low), now)
            .unwrap();
        store.complete(task.id(), now).unwrap();
        store.revert(task.id(), now).unwrap();
        store.delete(task.id()).unwrap();

        let received: Vec<StoreEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![
                StoreEvent::TaskAdded(task.id()),
                StoreEvent::TaskCompleted(task.id()),
                StoreEvent::TaskReverted(task.id()),
                StoreEvent::TaskDeleted(task.id()),
            ]
        );
    }
}
