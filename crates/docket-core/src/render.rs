use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;
use uuid::Uuid;

use crate::config::Config;
use crate::datetime::{Clock, format_civil_datetime, format_deadline};
use crate::deadline::{Urgency, task_deadline_status};
use crate::ordering::TaskView;
use crate::task::{Group, Priority, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        let color = cfg.get_bool("color").unwrap_or(true);
        Self {
            color: color && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(rows = view.len()))]
    pub fn print_task_view(
        &mut self,
        view: &TaskView<'_>,
        groups: &[Group],
        clock: &Clock,
    ) -> anyhow::Result<()> {
        self.write_task_view(io::stdout().lock(), view, groups, clock)
    }

    pub fn print_filters(&mut self, group: Option<&str>, query: &str) -> anyhow::Result<()> {
        self.write_filters(io::stdout().lock(), group, query)
    }

    /// Names the active filters above a listing; prints nothing when there
    /// are none.
    pub fn write_filters<W: Write>(
        &self,
        mut out: W,
        group: Option<&str>,
        query: &str,
    ) -> anyhow::Result<()> {
        let mut active = Vec::new();
        if let Some(name) = group {
            active.push(format!("group '{name}'"));
        }
        let query = query.trim();
        if !query.is_empty() {
            active.push(format!("search '{query}'"));
        }
        if active.is_empty() {
            return Ok(());
        }

        let line = format!(
            "Showing {} (`docket list --all` shows everything)",
            active.join(", ")
        );
        writeln!(out, "{}", self.paint(&line, "2"))?;
        Ok(())
    }

    /// Open tasks then completed tasks, numbered in one sequence so the
    /// numbers can be used as task references.
    pub fn write_task_view<W: Write>(
        &self,
        mut out: W,
        view: &TaskView<'_>,
        groups: &[Group],
        clock: &Clock,
    ) -> anyhow::Result<()> {
        if view.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        if !view.incomplete.is_empty() {
            let headers = ["#", "Priority", "Due", "Status", "Group", "Title"];
            let rows = view
                .incomplete
                .iter()
                .enumerate()
                .map(|(idx, task)| self.open_row(idx + 1, task, groups, clock))
                .collect();
            write_table(&mut out, &headers, rows)?;
        }

        if !view.completed.is_empty() {
            if !view.incomplete.is_empty() {
                writeln!(out)?;
            }
            writeln!(out, "Completed ({})", view.completed.len())?;
            let offset = view.incomplete.len();
            let headers = ["#", "Completed", "Group", "Title"];
            let rows = view
                .completed
                .iter()
                .enumerate()
                .map(|(idx, task)| {
                    vec![
                        self.paint(&(offset + idx + 1).to_string(), "2"),
                        task.completed_at
                            .map(|at| format_civil_datetime(clock, at))
                            .unwrap_or_default(),
                        group_name(groups, task.group_id),
                        task.title.clone(),
                    ]
                })
                .collect();
            write_table(&mut out, &headers, rows)?;
        }

        Ok(())
    }

    fn open_row(&self, number: usize, task: &Task, groups: &[Group], clock: &Clock) -> Vec<String> {
        let status = task_deadline_status(task, clock);
        let (due, status_text) = match (&task.deadline, &status) {
            (Some(deadline), Some(status)) => {
                let code = match status.urgency {
                    Urgency::Overdue => "31",
                    Urgency::Near => "33",
                    Urgency::Normal => "0",
                };
                (
                    format_deadline(clock, deadline),
                    self.paint(&status.message(), code),
                )
            }
            _ => (String::new(), String::new()),
        };

        let priority = match task.priority {
            Priority::Urgent => self.paint(task.priority.label(), "1;31"),
            Priority::Normal => task.priority.label().to_string(),
            Priority::Low => self.paint(task.priority.label(), "2"),
        };

        let title = match &task.link {
            Some(_) => format!("{} [link]", task.title),
            None => task.title.clone(),
        };

        vec![
            self.paint(&number.to_string(), "33"),
            priority,
            due,
            status_text,
            group_name(groups, task.group_id),
            title,
        ]
    }

    #[tracing::instrument(skip_all, fields(groups = groups.len()))]
    pub fn print_groups(&mut self, groups: &[Group], tasks: &[Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if groups.is_empty() {
            writeln!(out, "No groups.")?;
            return Ok(());
        }

        let rows = groups
            .iter()
            .map(|group| {
                let (open, done) = tasks
                    .iter()
                    .filter(|task| task.group_id == group.id)
                    .fold((0usize, 0usize), |(open, done), task| {
                        if task.completed {
                            (open, done + 1)
                        } else {
                            (open + 1, done)
                        }
                    });
                vec![group.name.clone(), open.to_string(), done.to_string()]
            })
            .collect();
        write_table(&mut out, &["Group", "Open", "Done"], rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(task_id = %task.id))]
    pub fn print_task_info(
        &mut self,
        task: &Task,
        groups: &[Group],
        clock: &Clock,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id         {}", task.id)?;
        writeln!(out, "title      {}", task.title)?;
        writeln!(out, "group      {}", group_name(groups, task.group_id))?;
        writeln!(out, "priority   {}", task.priority)?;
        if let Some(link) = &task.link {
            writeln!(out, "link       {link}")?;
        }
        writeln!(
            out,
            "created    {}",
            format_civil_datetime(clock, task.created_at)
        )?;
        if let Some(deadline) = &task.deadline {
            let status = task_deadline_status(task, clock)
                .map(|status| format!(" ({status})"))
                .unwrap_or_default();
            writeln!(out, "deadline   {}{status}", format_deadline(clock, deadline))?;
        }
        writeln!(
            out,
            "status     {}",
            if task.completed { "completed" } else { "open" }
        )?;
        if let Some(done) = task.completed_at {
            writeln!(out, "completed  {}", format_civil_datetime(clock, done))?;
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || code == "0" || text.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn group_name(groups: &[Group], id: Uuid) -> String {
    groups
        .iter()
        .find(|group| group.id == id)
        .map(|group| group.name.clone())
        .unwrap_or_else(|| "?".to_string())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(*header))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| pad(header, *width))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(cell, *width))
            .collect();
        writeln!(writer, "{}", line.join(" ").trim_end())?;
    }

    Ok(())
}

fn pad(cell: &str, width: usize) -> String {
    let padding = width.saturating_sub(visible_width(cell));
    format!("{cell}{}", " ".repeat(padding))
}

fn visible_width(cell: &str) -> usize {
    UnicodeWidthStr::width(strip_ansi(cell).as_str())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            for code in chars.by_ref() {
                if code == 'm' {
                    break;
                }
            }
            continue;
        }
        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{Renderer, strip_ansi, write_table};
    use crate::config::Config;
    use crate::datetime::Clock;
    use crate::state::{SequentialIds, TaskBoard};
    use crate::task::{Deadline, Priority, TaskDraft};

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[1;31murgent\x1b[0m"), "urgent");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn color_off_in_config_disables_painting() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("rc.color".to_string(), "no".to_string())]);
        let renderer = Renderer::new(&cfg);
        assert_eq!(renderer.paint("urgent", "1;31"), "urgent");
    }

    #[test]
    fn filter_line_names_active_filters() {
        let mut out = Vec::new();
        let renderer = Renderer::plain();
        renderer
            .write_filters(&mut out, None, "  ")
            .expect("no filters");
        assert!(out.is_empty());

        renderer
            .write_filters(&mut out, Some("Work"), "report")
            .expect("filters");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("Showing group 'Work', search 'report'"), "{text}");
    }

    #[test]
    fn table_pads_wide_characters() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            &["#", "Title"],
            vec![
                vec!["1".to_string(), "Báo cáo".to_string()],
                vec!["10".to_string(), "日本".to_string()],
            ],
        )
        .expect("write table");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#  Title");
        assert_eq!(lines[1], "-- -------");
        assert_eq!(lines[2], "1  Báo cáo");
        assert_eq!(lines[3], "10 日本");
    }

    #[test]
    fn view_lists_open_before_completed() {
        let now = Utc
            .with_ymd_and_hms(2024, 6, 10, 3, 0, 0)
            .single()
            .expect("valid now");
        let clock = Clock::fixed(now);
        let mut board = TaskBoard::with_ids(clock, SequentialIds::default());
        let work = board.create_group("Work").expect("create group");
        let due = NaiveDate::from_ymd_opt(2024, 6, 12).expect("valid date");
        board
            .create_task(
                TaskDraft::new("Report", work.id)
                    .with_priority(Priority::Urgent)
                    .with_deadline(Deadline::Date(due)),
            )
            .expect("create task");
        let done = board
            .create_task(TaskDraft::new("Slides", work.id))
            .expect("create task");
        board.toggle_task(done.id).expect("complete");

        let mut out = Vec::new();
        Renderer::plain()
            .write_task_view(&mut out, &board.view(), board.groups(), board.clock())
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");

        let report = text.find("Report").expect("open task listed");
        let completed = text.find("Completed (1)").expect("completed header");
        let slides = text.find("Slides").expect("completed task listed");
        assert!(report < completed && completed < slides, "{text}");
        assert!(text.contains("12/06/2024"), "{text}");
        assert!(text.contains("2 days left"), "{text}");
        assert!(!text.contains('\x1b'));
    }
}
