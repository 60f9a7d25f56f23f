//! Pure views over the task list. Nothing here keeps state; callers recompute
//! on every read.

use crate::error::AppError;
use crate::model::{Tag, Task};
use time::{Date, OffsetDateTime, UtcOffset};

pub fn active_of<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<&'a Task> {
    tasks.into_iter().filter(|task| !task.is_done()).collect()
}

pub fn completed_of<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<&'a Task> {
    tasks.into_iter().filter(|task| task.is_done()).collect()
}

pub fn important_of<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<&'a Task> {
    tasks.into_iter().filter(|task| task.is_important()).collect()
}

/// Tasks due on the current local calendar day.
pub fn today_of<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<&'a Task> {
    let offset = local_offset();
    let today = OffsetDateTime::now_utc().to_offset(offset).date();
    today_of_on(tasks, today, offset)
}

/// Tasks whose due date, seen from `offset`, falls on `today`.
pub fn today_of_on<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    today: Date,
    offset: UtcOffset,
) -> Vec<&'a Task> {
    tasks
        .into_iter()
        .filter(|task| {
            task.due_date
                .is_some_and(|due| due.to_offset(offset).date() == today)
        })
        .collect()
}

/// Case-insensitive tag match. A label outside the vocabulary matches nothing.
pub fn by_tag<'a>(tasks: impl IntoIterator<Item = &'a Task>, tag: &str) -> Vec<&'a Task> {
    let Ok(wanted) = Tag::parse(tag) else {
        return Vec::new();
    };
    tasks
        .into_iter()
        .filter(|task| task.tag == Some(wanted))
        .collect()
}

pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// The primary filter a page applies before splitting by completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    All,
    Today,
    Important,
    Tag(Tag),
}

impl View {
    pub fn parse(name: &str, tag: Option<&str>) -> Result<Self, AppError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "today" => Ok(Self::Today),
            "important" => Ok(Self::Important),
            "tag" => {
                let label = tag.ok_or_else(|| AppError::invalid_input("tag name is required"))?;
                Ok(Self::Tag(Tag::parse(label)?))
            }
            other => Err(AppError::invalid_input(format!("unknown view '{other}'"))),
        }
    }

    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        match self {
            Self::All => tasks.iter().collect(),
            Self::Today => today_of(tasks),
            Self::Important => important_of(tasks),
            Self::Tag(tag) => by_tag(tasks, tag.label()),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::All => "All Tasks".to_string(),
            Self::Today => "Today".to_string(),
            Self::Important => "Important".to_string(),
            Self::Tag(tag) => format!("#{}", tag.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSplit<'a> {
    pub active: Vec<&'a Task>,
    pub completed: Vec<&'a Task>,
}

impl<'a> ViewSplit<'a> {
    pub fn of(view: &View, tasks: &'a [Task]) -> Self {
        let selected = view.apply(tasks);
        Self {
            active: active_of(selected.iter().copied()),
            completed: completed_of(selected.iter().copied()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.completed.is_empty()
    }
}
