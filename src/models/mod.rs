pub mod priority;
pub mod status;
pub mod task;
pub mod task_type;

pub use priority::Priority;
pub use status::{CLOSE_TO_DUE_HOURS, TaskStatus, derive_status};
pub use task::{NewTask, Task, TaskId, parse_tags};
pub use task_type::{TaskType, TaskTypeId};
