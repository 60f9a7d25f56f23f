use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time, UtcOffset};

/// Prefix of identifiers handed out to optimistic records before the backend
/// confirms them. Backends never issue ids with this prefix.
pub const PLACEHOLDER_PREFIX: &str = "temp-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, deserialize_with = "lenient_tag")]
    pub tag: Option<Tag>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Task {
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_PREFIX)
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_important(&self) -> bool {
        self.priority == Priority::High
    }
}

/// Insert payload. The backend assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<Tag>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub due_date: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    /// Declared by the backend schema; no operation moves a task into or out of it yet.
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "in-progress" | "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(AppError::invalid_input(format!("unknown status '{other}'"))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(AppError::invalid_input(format!(
                "unknown priority '{other}'"
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Personal,
    Work,
    Learning,
}

impl Tag {
    pub const ALL: [Tag; 3] = [Tag::Personal, Tag::Work, Tag::Learning];

    /// Case-insensitive membership check against the tag vocabulary.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|tag| tag.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| AppError::invalid_input(format!("unknown tag '{trimmed}'")))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Work => "work",
            Self::Learning => "learning",
        }
    }
}

pub fn validate_title(title: &str) -> Result<&str, AppError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("title is required"));
    }
    Ok(trimmed)
}

/// Accepts a full RFC 3339 timestamp or a bare `YYYY-MM-DD` date, which is
/// pinned to midnight in `offset`.
pub fn parse_due_date(raw: &str, offset: UtcOffset) -> Result<OffsetDateTime, AppError> {
    let trimmed = raw.trim();
    if let Ok(value) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(value);
    }

    let date = Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
        .map_err(|_| AppError::invalid_input("due date must be YYYY-MM-DD or RFC3339"))?;
    Ok(date.with_time(Time::MIDNIGHT).assume_offset(offset))
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

fn lenient_tag<'de, D>(deserializer: D) -> Result<Option<Tag>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| {
        if value.trim().is_empty() {
            return None;
        }
        match Tag::parse(&value) {
            Ok(tag) => Some(tag),
            Err(_) => {
                tracing::warn!(tag = %value, "ignoring unrecognized tag");
                None
            }
        }
    }))
}
