use std::cmp::Ordering;

use chrono::{
  DateTime,
  Utc
};
use uuid::Uuid;

use crate::datetime::Clock;
use crate::deadline::task_deadline_status;
use crate::task::Task;

/// Precomputed comparator inputs, so
/// each task is classified once per
/// sort rather than once per
/// comparison.
#[derive(Debug, Clone, Copy)]
struct IncompleteKey {
  near:       bool,
  priority:   u8,
  days_until: Option<i64>,
  created_at: DateTime<Utc>
}

impl IncompleteKey {
  fn of(
    task: &Task,
    clock: &Clock
  ) -> Self {
    let status =
      task_deadline_status(task, clock);
    Self {
      near:       status
        .as_ref()
        .is_some_and(|s| s.is_near()),
      priority:   task.priority.ordinal(),
      days_until: status
        .map(|s| s.days_until),
      created_at: task.created_at
    }
  }
}

fn compare_keys(
  a: &IncompleteKey,
  b: &IncompleteKey
) -> Ordering {
  // Near deadlines jump the priority
  // queue; overdue ones do not.
  b.near
    .cmp(&a.near)
    .then_with(|| {
      b.priority.cmp(&a.priority)
    })
    .then_with(|| {
      cmp_optional(
        a.days_until.as_ref(),
        b.days_until.as_ref()
      )
    })
    .then_with(|| {
      a.created_at.cmp(&b.created_at)
    })
}

/// Display order for open tasks. The
/// sort is stable: tasks with equal
/// keys keep their input order.
#[tracing::instrument(skip_all)]
pub fn order_incomplete<'a, I>(
  tasks: I,
  clock: &Clock
) -> Vec<&'a Task>
where
  I: IntoIterator<Item = &'a Task>
{
  let mut keyed: Vec<(
    &'a Task,
    IncompleteKey
  )> = tasks
    .into_iter()
    .map(|task| {
      (task, IncompleteKey::of(task, clock))
    })
    .collect();
  keyed.sort_by(|(_, a), (_, b)| {
    compare_keys(a, b)
  });
  tracing::trace!(
    count = keyed.len(),
    "ordered incomplete tasks"
  );
  keyed
    .into_iter()
    .map(|(task, _)| task)
    .collect()
}

/// Most recently completed first; a
/// missing completion time sorts as
/// the oldest.
pub fn order_completed<'a, I>(
  tasks: I
) -> Vec<&'a Task>
where
  I: IntoIterator<Item = &'a Task>
{
  let mut ordered: Vec<&'a Task> =
    tasks.into_iter().collect();
  ordered.sort_by(|a, b| {
    b.completed_at.cmp(&a.completed_at)
  });
  ordered
}

fn cmp_optional<T: Ord>(
  left: Option<&T>,
  right: Option<&T>
) -> Ordering {
  match (left, right) {
    | (Some(a), Some(b)) => a.cmp(b),
    | (Some(_), None) => Ordering::Less,
    | (None, Some(_)) => {
      Ordering::Greater
    }
    | (None, None) => Ordering::Equal
  }
}

/// The two ordered sequences a list
/// view renders.
#[derive(Debug, Clone, Default)]
pub struct TaskView<'a> {
  pub incomplete: Vec<&'a Task>,
  pub completed:  Vec<&'a Task>
}

impl<'a> TaskView<'a> {
  pub fn len(&self) -> usize {
    self.incomplete.len()
      + self.completed.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Incomplete then completed, the
  /// order rows are numbered in.
  pub fn iter(
    &self
  ) -> impl Iterator<Item = &'a Task> + '_
  {
    self
      .incomplete
      .iter()
      .chain(self.completed.iter())
      .copied()
  }
}

/// Applies the group filter and a
/// case-insensitive title search, then
/// orders both halves.
pub fn build_view<'a>(
  tasks: &'a [Task],
  selected_group: Option<Uuid>,
  search_query: &str,
  clock: &Clock
) -> TaskView<'a> {
  let needle =
    search_query.trim().to_lowercase();
  let (completed, incomplete): (
    Vec<&Task>,
    Vec<&Task>
  ) = tasks
    .iter()
    .filter(|task| {
      selected_group.is_none_or(|id| {
        task.group_id == id
      })
    })
    .filter(|task| {
      needle.is_empty()
        || task
          .title
          .to_lowercase()
          .contains(&needle)
    })
    .partition(|task| task.completed);

  TaskView {
    incomplete: order_incomplete(
      incomplete, clock
    ),
    completed:  order_completed(
      completed
    )
  }
}
