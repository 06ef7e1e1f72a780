use std::fmt;

use chrono::Duration;
use serde::Serialize;

use crate::datetime::Clock;
use crate::task::{
  Deadline,
  Task
};

/// Deadlines this many civil days out
/// (or fewer) count as near.
pub const NEAR_WINDOW_DAYS: i64 = 2;

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  PartialEq,
  Eq,
  Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
  Overdue,
  Near,
  Normal
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineStatus {
  pub urgency:    Urgency,
  /// Civil days from today to the
  /// deadline day; negative once it
  /// has passed.
  pub days_until: i64,
  /// Signed time from now to the end
  /// of the deadline day.
  pub remaining:  Duration
}

impl DeadlineStatus {
  pub fn is_near(&self) -> bool {
    self.urgency == Urgency::Near
  }

  pub fn message(&self) -> String {
    match self.urgency {
      | Urgency::Overdue => {
        let days =
          self.days_until.unsigned_abs();
        format!(
          "{days} {} overdue",
          day_word(days)
        )
      }
      | Urgency::Near
        if self.days_until == 0 =>
      {
        "due today".to_string()
      }
      | Urgency::Near
      | Urgency::Normal => {
        let days =
          self.days_until.unsigned_abs();
        format!(
          "{days} {} left",
          day_word(days)
        )
      }
    }
  }
}

impl fmt::Display for DeadlineStatus {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(&self.message())
  }
}

fn day_word(days: u64) -> &'static str {
  if days == 1 { "day" } else { "days" }
}

/// Whole civil days between today and
/// the deadline day.
///
/// This is the same number as flooring
/// `end_of_day(deadline) - now` to
/// days, without the rounding hazards.
pub fn days_until(
  deadline: &Deadline,
  clock: &Clock
) -> i64 {
  deadline
    .civil_date(clock)
    .signed_duration_since(clock.today())
    .num_days()
}

pub fn classify(
  deadline: &Deadline,
  clock: &Clock
) -> DeadlineStatus {
  let days_until =
    days_until(deadline, clock);
  let end = clock.end_of_day(
    deadline.civil_date(clock)
  );
  let remaining =
    end.signed_duration_since(
      clock.now()
    );

  let urgency = if days_until < 0 {
    Urgency::Overdue
  } else if days_until
    <= NEAR_WINDOW_DAYS
  {
    Urgency::Near
  } else {
    Urgency::Normal
  };

  DeadlineStatus {
    urgency,
    days_until,
    remaining
  }
}

/// Classification for a task, or
/// `None` when it has no deadline.
pub fn task_deadline_status(
  task: &Task,
  clock: &Clock
) -> Option<DeadlineStatus> {
  task
    .deadline
    .as_ref()
    .map(|deadline| {
      classify(deadline, clock)
    })
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    Urgency,
    classify
  };
  use crate::datetime::Clock;
  use crate::task::Deadline;

  // 2024-06-10 23:30 civil time.
  fn late_evening() -> Clock {
    Clock::fixed(
      Utc
        .with_ymd_and_hms(
          2024, 6, 10, 16, 30, 0
        )
        .single()
        .expect("valid now")
    )
  }

  fn on(day: u32) -> Deadline {
    Deadline::Date(
      NaiveDate::from_ymd_opt(
        2024, 6, day
      )
      .expect("valid date")
    )
  }

  #[test]
  fn classifies_each_window() {
    let clock = late_evening();
    let cases = [
      (7, Urgency::Overdue, -3, "3 days overdue"),
      (9, Urgency::Overdue, -1, "1 day overdue"),
      (10, Urgency::Near, 0, "due today"),
      (11, Urgency::Near, 1, "1 day left"),
      (12, Urgency::Near, 2, "2 days left"),
      (13, Urgency::Normal, 3, "3 days left")
    ];

    for (day, urgency, days, message) in
      cases
    {
      let status =
        classify(&on(day), &clock);
      assert_eq!(
        status.urgency, urgency,
        "day {day}"
      );
      assert_eq!(
        status.days_until, days,
        "day {day}"
      );
      assert_eq!(status.message(), message);
    }
  }

  #[test]
  fn today_has_time_remaining_until_midnight()
  {
    let status =
      classify(&on(10), &late_evening());
    assert_eq!(
      status.remaining.num_minutes(),
      29
    );

    let overdue =
      classify(&on(9), &late_evening());
    assert!(
      overdue.remaining.num_minutes() < 0
    );
  }

  #[test]
  fn instant_deadlines_use_their_civil_day()
  {
    // 20:00 UTC on the 11th is already
    // the 12th in civil time.
    let deadline = Deadline::At(
      Utc
        .with_ymd_and_hms(
          2024, 6, 11, 20, 0, 0
        )
        .single()
        .expect("valid deadline")
    );
    let status = classify(
      &deadline,
      &late_evening()
    );
    assert_eq!(status.days_until, 2);
    assert_eq!(
      status.urgency,
      Urgency::Near
    );
  }

  #[test]
  fn classification_is_repeatable() {
    let clock = late_evening();
    assert_eq!(
      classify(&on(12), &clock),
      classify(&on(12), &clock)
    );
  }
}
