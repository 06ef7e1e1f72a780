use reqwest::Url;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::datetime::Clock;
use crate::error::{DocketError, ImportError};
use crate::ordering::{TaskView, build_view};
use crate::task::{Group, Snapshot, Task, TaskDraft, TaskPatch, ViewState};

/// Source of identifiers for new tasks and groups.
pub trait IdSource {
    fn new_id(&mut self) -> Uuid;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn new_id(&mut self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Predictable ids (`00000000-0000-0000-0000-000000000001`, ...), for tests and
/// fixtures.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialIds {
    next: u128,
}

impl IdSource for SequentialIds {
    fn new_id(&mut self) -> Uuid {
        self.next += 1;
        Uuid::from_u128(self.next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRemoval {
    pub group: Group,
    pub removed_tasks: Vec<Task>,
    pub filter_cleared: bool,
}

/// Owns the task and group collections plus the view filters, and applies
/// every change to them.
///
/// Each transition validates first and mutates second, so a returned error
/// means nothing changed.
#[derive(Debug, Clone)]
pub struct TaskBoard<I = RandomIds> {
    tasks: Vec<Task>,
    groups: Vec<Group>,
    selected_group_id: Option<Uuid>,
    search_query: String,
    clock: Clock,
    ids: I,
}

impl TaskBoard<RandomIds> {
    pub fn new(clock: Clock) -> Self {
        Self::with_ids(clock, RandomIds)
    }

    /// Restores a board from persisted collections without re-validating
    /// them. [`crate::datastore::DataStore::load_snapshot`] repairs what it
    /// reads; backups go through [`TaskBoard::import`].
    pub fn from_collections(clock: Clock, tasks: Vec<Task>, groups: Vec<Group>) -> Self {
        let mut board = Self::new(clock);
        board.tasks = tasks;
        board.groups = groups;
        board
    }
}

impl<I: IdSource> TaskBoard<I> {
    pub fn with_ids(clock: Clock, ids: I) -> Self {
        Self {
            tasks: Vec::new(),
            groups: Vec::new(),
            selected_group_id: None,
            search_query: String::new(),
            clock,
            ids,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn selected_group_id(&self) -> Option<Uuid> {
        self.selected_group_id
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn view_state(&self) -> ViewState {
        ViewState {
            selected_group_id: self.selected_group_id,
            search_query: self.search_query.clone(),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn group(&self, id: Uuid) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn find_group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name_matches(name))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.tasks.clone(),
            groups: self.groups.clone(),
        }
    }

    /// Filtered and ordered view of the board under the current filters.
    pub fn view(&self) -> TaskView<'_> {
        build_view(
            &self.tasks,
            self.selected_group_id,
            &self.search_query,
            &self.clock,
        )
    }

    #[instrument(skip(self, draft), fields(group_id = %draft.group_id))]
    pub fn create_task(&mut self, draft: TaskDraft) -> Result<Task, DocketError> {
        let now = self.clock.now_utc();
        let task = self.build_task(draft, now)?;
        info!(task_id = %task.id, priority = %task.priority, "created task");
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Creates every draft with one shared creation time, or none of them.
    #[instrument(skip(self, drafts), fields(count = drafts.len()))]
    pub fn create_tasks(&mut self, drafts: Vec<TaskDraft>) -> Result<Vec<Task>, DocketError> {
        let now = self.clock.now_utc();
        let built = drafts
            .into_iter()
            .map(|draft| self.build_task(draft, now))
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = built.len(), "created task batch");
        self.tasks.extend(built.iter().cloned());
        Ok(built)
    }

    #[instrument(skip(self, patch), fields(task_id = %id))]
    pub fn update_task(&mut self, id: Uuid, patch: TaskPatch) -> Result<Task, DocketError> {
        let current = self.task(id).ok_or(DocketError::TaskNotFound(id))?;
        let mut updated = current.clone();

        if let Some(title) = patch.title {
            updated.title = validate_title(&title)?;
        }
        if let Some(link) = patch.link {
            updated.link = match link {
                Some(raw) => validate_link(&raw)?,
                None => None,
            };
        }
        if let Some(priority) = patch.priority {
            updated.priority = priority;
        }
        if let Some(group_id) = patch.group_id {
            self.require_group(group_id)?;
            updated.group_id = group_id;
        }
        if let Some(deadline) = patch.deadline {
            updated.deadline = deadline;
        }

        debug!(task_id = %id, "task patch applied");
        self.replace_task(updated.clone());
        Ok(updated)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn toggle_task(&mut self, id: Uuid) -> Result<Task, DocketError> {
        let now = self.clock.now_utc();
        let task = self
            .tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(DocketError::TaskNotFound(id))?;

        task.completed = !task.completed;
        task.completed_at = task.completed.then_some(now);
        info!(task_id = %id, completed = task.completed, "toggled task");
        Ok(task.clone())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn delete_task(&mut self, id: Uuid) -> Result<Task, DocketError> {
        let idx = self
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or(DocketError::TaskNotFound(id))?;
        let removed = self.tasks.remove(idx);
        info!(task_id = %id, "deleted task");
        Ok(removed)
    }

    /// Returns the existing group when one already carries this name,
    /// compared case-insensitively.
    #[instrument(skip(self))]
    pub fn create_group(&mut self, name: &str) -> Result<Group, DocketError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DocketError::validation("name", "group name cannot be empty"));
        }

        if let Some(existing) = self.find_group_by_name(name) {
            debug!(group_id = %existing.id, "group name already taken; reusing");
            return Ok(existing.clone());
        }

        let group = Group {
            id: self.ids.new_id(),
            name: name.to_string(),
            created_at: self.clock.now_utc(),
        };
        info!(group_id = %group.id, name = %group.name, "created group");
        self.groups.push(group.clone());
        Ok(group)
    }

    /// Removes the group and every task in it.
    #[instrument(skip(self), fields(group_id = %id))]
    pub fn delete_group(&mut self, id: Uuid) -> Result<GroupRemoval, DocketError> {
        let idx = self
            .groups
            .iter()
            .position(|group| group.id == id)
            .ok_or(DocketError::GroupNotFound(id))?;

        let group = self.groups.remove(idx);
        let (removed_tasks, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| task.group_id == id);
        self.tasks = kept;

        let filter_cleared = self.selected_group_id == Some(id);
        if filter_cleared {
            self.selected_group_id = None;
        }

        info!(
            group_id = %id,
            removed_tasks = removed_tasks.len(),
            filter_cleared,
            "deleted group"
        );
        Ok(GroupRemoval {
            group,
            removed_tasks,
            filter_cleared,
        })
    }

    pub fn set_selected_group(&mut self, group_id: Option<Uuid>) {
        debug!(group_id = ?group_id, "group filter set");
        self.selected_group_id = group_id;
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
        debug!(query = %self.search_query, "search query set");
    }

    /// Reapplies stored filters. A selected group that no longer exists is
    /// dropped rather than leaving an empty listing.
    pub fn restore_view(&mut self, state: ViewState) {
        let ViewState {
            selected_group_id,
            search_query,
        } = state;
        let selected = selected_group_id.filter(|id| {
            let known = self.group(*id).is_some();
            if !known {
                warn!(group_id = %id, "stored group filter points at a missing group; clearing");
            }
            known
        });
        self.set_selected_group(selected);
        self.set_search_query(search_query);
    }

    /// Replaces both collections wholesale.
    #[instrument(skip(self, snapshot), fields(tasks = snapshot.tasks.len(), groups = snapshot.groups.len()))]
    pub fn import(&mut self, snapshot: Snapshot) -> Result<(), ImportError> {
        snapshot.validate()?;

        let Snapshot { tasks, groups } = snapshot;
        if let Some(selected) = self.selected_group_id
            && !groups.iter().any(|group| group.id == selected)
        {
            self.selected_group_id = None;
        }
        self.tasks = tasks;
        self.groups = groups;
        info!(
            tasks = self.tasks.len(),
            groups = self.groups.len(),
            "imported snapshot"
        );
        Ok(())
    }

    fn build_task(
        &mut self,
        draft: TaskDraft,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Task, DocketError> {
        let title = validate_title(&draft.title)?;
        self.require_group(draft.group_id)?;
        let link = match draft.link {
            Some(raw) => validate_link(&raw)?,
            None => None,
        };

        Ok(Task {
            id: self.ids.new_id(),
            title,
            link,
            priority: draft.priority,
            group_id: draft.group_id,
            created_at: now,
            deadline: draft.deadline,
            completed: false,
            completed_at: None,
        })
    }

    fn require_group(&self, group_id: Uuid) -> Result<(), DocketError> {
        if self.group(group_id).is_some() {
            Ok(())
        } else {
            Err(DocketError::validation(
                "groupId",
                format!("no group with id {group_id}"),
            ))
        }
    }

    fn replace_task(&mut self, updated: Task) {
        if let Some(slot) = self.tasks.iter_mut().find(|task| task.id == updated.id) {
            *slot = updated;
        }
    }
}

fn validate_title(raw: &str) -> Result<String, DocketError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(DocketError::validation("title", "title cannot be empty"));
    }
    Ok(title.to_string())
}

/// Normalizes a link: blank means no link, anything else must be an absolute
/// http(s) URL.
pub fn validate_link(raw: &str) -> Result<Option<String>, DocketError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(trimmed)
        .map_err(|err| DocketError::validation("link", format!("invalid URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(Some(trimmed.to_string())),
        other => Err(DocketError::validation(
            "link",
            format!("unsupported URL scheme: {other}"),
        )),
    }
}
