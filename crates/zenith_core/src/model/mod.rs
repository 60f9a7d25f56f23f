mod task;

pub use task::{
    NewTask, PLACEHOLDER_PREFIX, Priority, Tag, Task, TaskStatus, parse_due_date, validate_title,
};
