use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

use crate::task::Deadline;

const TIMEZONE_ENV_VAR: &str =
  "DOCKET_TIMEZONE";
pub const DEFAULT_TIMEZONE: &str =
  "Asia/Ho_Chi_Minh";

/// A timestamp expressed in the
/// board's civil timezone.
pub type CivilInstant = DateTime<Tz>;

/// The single conversion boundary
/// between stored UTC timestamps and
/// civil time.
///
/// A clock is either live (reads the
/// system time on every call) or
/// pinned to a fixed instant, which is
/// what tests and reproducible views
/// use.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Clock {
  tz:     Tz,
  pinned: Option<DateTime<Utc>>
}

impl Clock {
  pub fn with_timezone(
    tz: Tz
  ) -> Self {
    Self { tz, pinned: None }
  }

  /// Clock frozen at `at`, in the
  /// default civil timezone.
  pub fn fixed(
    at: DateTime<Utc>
  ) -> Self {
    Self {
      tz:     fallback_timezone(),
      pinned: Some(at)
    }
  }

  #[must_use]
  pub fn pinned_at(
    self,
    at: DateTime<Utc>
  ) -> Self {
    Self {
      pinned: Some(at),
      ..self
    }
  }

  pub fn timezone(&self) -> Tz {
    self.tz
  }

  pub fn now_utc(
    &self
  ) -> DateTime<Utc> {
    self.pinned.unwrap_or_else(Utc::now)
  }

  pub fn now(&self) -> CivilInstant {
    self.normalize(self.now_utc())
  }

  pub fn normalize(
    &self,
    timestamp: DateTime<Utc>
  ) -> CivilInstant {
    timestamp.with_timezone(&self.tz)
  }

  /// Parses a stored RFC 3339
  /// timestamp into civil time.
  pub fn parse_timestamp(
    &self,
    raw: &str
  ) -> anyhow::Result<CivilInstant> {
    let parsed =
      DateTime::parse_from_rfc3339(
        raw.trim()
      )
      .with_context(|| {
        format!(
          "invalid timestamp: {raw}"
        )
      })?;
    Ok(
      parsed.with_timezone(&self.tz)
    )
  }

  pub fn today(&self) -> NaiveDate {
    self.now().date_naive()
  }

  pub fn civil_date(
    &self,
    timestamp: DateTime<Utc>
  ) -> NaiveDate {
    self
      .normalize(timestamp)
      .date_naive()
  }

  /// Last representable millisecond
  /// of `date` in civil time.
  pub fn end_of_day(
    &self,
    date: NaiveDate
  ) -> CivilInstant {
    let last_ms =
      NaiveTime::from_hms_milli_opt(
        23, 59, 59, 999
      )
      .unwrap_or_default();
    let local = date.and_time(last_ms);
    match self
      .tz
      .from_local_datetime(&local)
    {
      | LocalResult::Single(dt) => dt,
      | LocalResult::Ambiguous(
        _,
        later
      ) => later,
      | LocalResult::None => {
        tracing::warn!(
          date = %date,
          timezone = %self.tz,
          "end of day does not exist \
           in civil timezone; reading \
           it as UTC"
        );
        self.tz.from_utc_datetime(&local)
      }
    }
  }

  fn to_utc_from_civil(
    &self,
    local: NaiveDateTime,
    context: &str
  ) -> anyhow::Result<DateTime<Utc>> {
    match self
      .tz
      .from_local_datetime(&local)
    {
      | LocalResult::Single(dt) => {
        Ok(dt.with_timezone(&Utc))
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        tracing::warn!(
          context,
          first = %first,
          second = %second,
          "ambiguous civil datetime; using earliest"
        );
        Ok(
          first
            .min(second)
            .with_timezone(&Utc)
        )
      }
      | LocalResult::None => {
        Err(anyhow!(
          "civil datetime does not \
           exist in {}: {context}",
          self.tz
        ))
      }
    }
  }
}

/// Resolves the civil timezone from
/// the environment, then the
/// configured value, then the default.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  fallback_timezone()
}

fn fallback_timezone() -> Tz {
  DEFAULT_TIMEZONE
    .parse::<Tz>()
    .unwrap_or(chrono_tz::Asia::Ho_Chi_Minh)
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured civil timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Turns user input into a deadline.
///
/// Relative forms resolve against
/// `clock.today()`; bare dates stay
/// dates, anything with a clock time
/// becomes an instant.
#[tracing::instrument(skip(clock), fields(input = input))]
pub fn parse_deadline_expr(
  input: &str,
  clock: &Clock
) -> anyhow::Result<Deadline> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = clock.today();

  match lower.as_str() {
    | "today" => {
      return Ok(Deadline::Date(today));
    }
    | "tomorrow" => {
      return shift_days(today, 1)
        .map(Deadline::Date);
    }
    | "yesterday" => {
      return shift_days(today, -1)
        .map(Deadline::Date);
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return Ok(Deadline::Date(
      next_weekday_date(today, target)
    ));
  }

  if let Some(caps) = relative_re()
    .and_then(|re| re.captures(&lower))
  {
    let num: i64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let days = match &caps["unit"] {
      | "w" => num.saturating_mul(7),
      | _ => num
    };
    let signed = if &caps["sign"] == "-"
    {
      -days
    } else {
      days
    };
    return shift_days(today, signed)
      .map(Deadline::Date);
  }

  for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, fmt
      )
    {
      return Ok(Deadline::Date(date));
    }
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(Deadline::At(
      dt.with_timezone(&Utc)
    ));
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return clock
        .to_utc_from_civil(ndt, fmt)
        .map(Deadline::At);
    }
  }

  Err(anyhow!(
    "unrecognized deadline: {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     weekday names (e.g. friday), \
     +Nd/-Nd/+Nw, YYYY-MM-DD, \
     DD/MM/YYYY, RFC3339, \
     YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

/// `+3d`, `-1w`, ...
fn relative_re() -> Option<&'static Regex>
{
  static RELATIVE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  RELATIVE
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
      )
      .inspect_err(|err| {
        tracing::error!(
          error = %err,
          "relative deadline pattern \
           failed to compile"
        );
      })
      .ok()
    })
    .as_ref()
}

fn shift_days(
  from: NaiveDate,
  days: i64
) -> anyhow::Result<NaiveDate> {
  Duration::try_days(days)
    .and_then(|delta| {
      from.checked_add_signed(delta)
    })
    .ok_or_else(|| {
      anyhow!(
        "deadline out of range: \
         {from} {days:+} days"
      )
    })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

#[must_use]
pub fn format_civil_datetime(
  clock: &Clock,
  timestamp: DateTime<Utc>
) -> String {
  clock
    .normalize(timestamp)
    .format("%d/%m/%Y %H:%M")
    .to_string()
}

#[must_use]
pub fn format_deadline(
  clock: &Clock,
  deadline: &Deadline
) -> String {
  match deadline {
    | Deadline::Date(date) => {
      date.format("%d/%m/%Y").to_string()
    }
    | Deadline::At(at) => {
      format_civil_datetime(clock, *at)
    }
  }
}
