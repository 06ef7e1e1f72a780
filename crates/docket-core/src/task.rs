use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::datetime::Clock;
use crate::error::ImportError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    #[serde(alias = "YEU")]
    Low,
    #[default]
    #[serde(alias = "BINH_THUONG")]
    Normal,
    #[serde(alias = "GAP")]
    Urgent,
}

impl Priority {
    /// Sort weight: higher sorts first.
    pub fn ordinal(self) -> u8 {
        match self {
            Priority::Urgent => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "n" | "normal" => Ok(Priority::Normal),
            "u" | "urgent" => Ok(Priority::Urgent),
            other => Err(anyhow::anyhow!(
                "unknown priority: {other} (expected low, normal or urgent)"
            )),
        }
    }
}

/// A deadline is either a bare civil date or an exact instant. Either way it
/// expires at the end of its civil day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Deadline {
    Date(NaiveDate),
    At(DateTime<Utc>),
}

impl Deadline {
    pub fn civil_date(&self, clock: &Clock) -> NaiveDate {
        match self {
            Deadline::Date(date) => *date,
            Deadline::At(at) => clock.civil_date(*at),
        }
    }

    /// Parses the stored form: `YYYY-MM-DD` or RFC 3339. A date-time without
    /// an offset only keeps its date.
    pub fn parse_stored(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(Deadline::Date(date));
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Deadline::At(at.with_timezone(&Utc)));
        }
        if let Some((date, _)) = raw.split_once('T')
            && let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        {
            return Ok(Deadline::Date(date));
        }
        Err(format!("invalid deadline: {raw}"))
    }
}

impl TryFrom<String> for Deadline {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Deadline::parse_stored(&value)
    }
}

impl From<Deadline> for String {
    fn from(value: Deadline) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Deadline::At(at) => f.write_str(&at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    pub group_id: Uuid,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Deadline>,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn completion_is_consistent(&self) -> bool {
        self.completed == self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.trim().to_lowercase()
    }
}

/// Input for the create-task transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub group_id: Uuid,
    pub priority: Priority,
    pub link: Option<String>,
    pub deadline: Option<Deadline>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, group_id: Uuid) -> Self {
        Self {
            title: title.into(),
            group_id,
            priority: Priority::default(),
            link: None,
            deadline: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Field edits for an existing task. `None` leaves a field alone; the nested
/// options clear the field when set to `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub link: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub group_id: Option<Uuid>,
    pub deadline: Option<Option<Deadline>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &TaskPatch::default()
    }
}

/// Both collections, as persisted and exchanged through backups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub groups: Vec<Group>,
}

impl Snapshot {
    /// Checks the entity invariants a board relies on.
    pub fn validate(&self) -> Result<(), ImportError> {
        for (index, task) in self.tasks.iter().enumerate() {
            if task.title.trim().is_empty() {
                return Err(ImportError::Inconsistent(format!(
                    "task #{index} ({}) has an empty title",
                    task.id
                )));
            }
            if !task.completion_is_consistent() {
                return Err(ImportError::Inconsistent(format!(
                    "task #{index} ({}) has completed={} but completedAt {}",
                    task.id,
                    task.completed,
                    if task.completed_at.is_some() { "set" } else { "missing" }
                )));
            }
            if !self.groups.iter().any(|group| group.id == task.group_id) {
                return Err(ImportError::Inconsistent(format!(
                    "task #{index} ({}) references unknown group {}",
                    task.id, task.group_id
                )));
            }
        }

        for (index, group) in self.groups.iter().enumerate() {
            if group.name.trim().is_empty() {
                return Err(ImportError::Inconsistent(format!(
                    "group #{index} ({}) has an empty name",
                    group.id
                )));
            }
        }

        Ok(())
    }

    /// Brings stored collections back in line with [`Snapshot::validate`],
    /// logging every change, and returns how many records were touched.
    ///
    /// Groups with a blank name are dropped, then tasks with a blank title or
    /// a missing group. Tasks whose `completed` flag disagrees with
    /// `completedAt` are reopened.
    pub fn repair(&mut self) -> usize {
        let mut repaired = 0;

        self.groups.retain(|group| {
            if group.name.trim().is_empty() {
                warn!(group_id = %group.id, "dropping stored group with an empty name");
                repaired += 1;
                return false;
            }
            true
        });

        let groups = &self.groups;
        self.tasks.retain(|task| {
            if task.title.trim().is_empty() {
                warn!(task_id = %task.id, "dropping stored task with an empty title");
                repaired += 1;
                return false;
            }
            if !groups.iter().any(|group| group.id == task.group_id) {
                warn!(
                    task_id = %task.id,
                    group_id = %task.group_id,
                    title = %task.title,
                    "dropping stored task whose group is missing"
                );
                repaired += 1;
                return false;
            }
            true
        });

        for task in &mut self.tasks {
            if !task.completion_is_consistent() {
                warn!(
                    task_id = %task.id,
                    completed = task.completed,
                    "reopening stored task with inconsistent completion"
                );
                task.completed = false;
                task.completed_at = None;
                repaired += 1;
            }
        }

        repaired
    }
}

/// The listing filters. They are stored next to the collections so that row
/// numbers printed by one command mean the same rows in the next.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_group_id: Option<Uuid>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub search_query: String,
}

impl ViewState {
    pub fn is_filtered(&self) -> bool {
        self.selected_group_id.is_some() || !self.search_query.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    use super::{Deadline, Priority, Task};

    #[test]
    fn priority_accepts_legacy_tags() {
        let parsed: Vec<Priority> =
            serde_json::from_str(r#"["YEU", "BINH_THUONG", "GAP", "URGENT"]"#)
                .expect("parse priorities");
        assert_eq!(
            parsed,
            vec![
                Priority::Low,
                Priority::Normal,
                Priority::Urgent,
                Priority::Urgent
            ]
        );
        assert_eq!(
            serde_json::to_string(&Priority::Normal).expect("serialize"),
            "\"NORMAL\""
        );
        assert!(Priority::Urgent.ordinal() > Priority::Normal.ordinal());
        assert!(Priority::Normal.ordinal() > Priority::Low.ordinal());
    }

    #[test]
    fn deadline_keeps_its_stored_form() {
        let date = Deadline::parse_stored("2024-06-01").expect("date");
        assert_eq!(
            date,
            Deadline::Date(NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date"))
        );
        assert_eq!(date.to_string(), "2024-06-01");

        let at = Deadline::parse_stored("2024-06-01T10:00:00+07:00").expect("instant");
        assert_eq!(at.to_string(), "2024-06-01T03:00:00Z");

        let naive = Deadline::parse_stored("2024-06-01T10:00").expect("naive");
        assert_eq!(naive.to_string(), "2024-06-01");

        assert!(Deadline::parse_stored("June 1st").is_err());
    }

    #[test]
    fn task_serializes_with_camel_case_fields() {
        let created = Utc
            .with_ymd_and_hms(2024, 6, 1, 2, 0, 0)
            .single()
            .expect("valid timestamp");
        let task = Task {
            id: Uuid::nil(),
            title: "Report".to_string(),
            link: None,
            priority: Priority::Urgent,
            group_id: Uuid::nil(),
            created_at: created,
            deadline: Some(Deadline::parse_stored("2024-06-03").expect("date")),
            completed: false,
            completed_at: None,
        };

        let value = serde_json::to_value(&task).expect("serialize task");
        assert_eq!(value["groupId"], Uuid::nil().to_string());
        assert_eq!(value["createdAt"], "2024-06-01T02:00:00Z");
        assert_eq!(value["deadline"], "2024-06-03");
        assert!(value.get("completedAt").is_none());
        assert!(value.get("link").is_none());

        let back: Task = serde_json::from_value(value).expect("deserialize task");
        assert_eq!(back, task);
    }
}
