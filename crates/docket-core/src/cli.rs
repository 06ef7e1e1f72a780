use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::task::Priority;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        let key = k.trim();
        if key.is_empty() {
            return Err(anyhow!("empty key in override: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "docket",
    version,
    about = "Docket: grouped tasks ordered by deadline urgency",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Defaults to `list`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add a task.
    Add(AddArgs),
    /// Show open tasks by urgency, then completed tasks.
    #[command(visible_alias = "ls")]
    List(ListArgs),
    /// Show only tasks in one group, in this and later listings.
    Filter {
        #[arg(required_unless_present = "clear", conflicts_with = "clear")]
        group: Option<String>,

        /// Show every group again.
        #[arg(long = "clear")]
        clear: bool,
    },
    /// Show only tasks whose title contains the text, in this and later
    /// listings.
    Search {
        #[arg(required_unless_present = "clear", conflicts_with = "clear", num_args = 1..)]
        query: Vec<String>,

        /// Drop the search text.
        #[arg(long = "clear")]
        clear: bool,
    },
    /// Toggle completion of one or more tasks.
    #[command(visible_alias = "toggle")]
    Done {
        #[arg(required = true, num_args = 1..)]
        tasks: Vec<String>,
    },
    /// Change fields of a task.
    Edit(EditArgs),
    /// Delete one or more tasks.
    #[command(visible_alias = "delete")]
    Rm {
        #[arg(required = true, num_args = 1..)]
        tasks: Vec<String>,
    },
    /// Show every field of a task.
    Info {
        task: String,
    },
    #[command(subcommand)]
    Group(GroupCommand),
    /// Write a backup of all tasks and groups.
    Export {
        /// Output file, or `-` for stdout.
        path: Option<PathBuf>,
    },
    /// Replace all tasks and groups with a backup.
    Import {
        /// Backup file, or `-` for stdin.
        path: PathBuf,
    },
    /// Add a task for a YouTube link, titled after the video.
    Youtube(YoutubeArgs),
    /// Add one task per YouTube link, one link per line.
    YoutubeBulk(YoutubeBulkArgs),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum GroupCommand {
    /// Create a group, or reuse the one with this name.
    Add { name: String },
    /// List groups with their task counts.
    #[command(visible_alias = "ls")]
    List,
    /// Delete a group and all of its tasks.
    #[command(visible_alias = "delete")]
    Rm { name: String },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    /// Group name; created when missing. Defaults to `default.group`.
    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    #[arg(short = 'p', long = "priority", default_value_t = Priority::Normal)]
    pub priority: Priority,

    #[arg(short = 'l', long = "link")]
    pub link: Option<String>,

    /// today, tomorrow, friday, +3d, 2024-06-01, 01/06/2024, ...
    #[arg(short = 'd', long = "due")]
    pub due: Option<String>,
}

/// Filters given here stick, like `filter` and `search`, so row numbers stay
/// valid for the next `done`, `edit` or `rm`.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ListArgs {
    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    #[arg(short = 's', long = "search")]
    pub search: Option<String>,

    /// Clear the group filter and search first.
    #[arg(short = 'a', long = "all")]
    pub all: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct EditArgs {
    pub task: String,

    #[arg(short = 't', long = "title")]
    pub title: Option<String>,

    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    #[arg(short = 'p', long = "priority")]
    pub priority: Option<Priority>,

    #[arg(short = 'l', long = "link", conflicts_with = "no_link")]
    pub link: Option<String>,

    #[arg(long = "no-link")]
    pub no_link: bool,

    #[arg(short = 'd', long = "due", conflicts_with = "no_due")]
    pub due: Option<String>,

    #[arg(long = "no-due")]
    pub no_due: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct YoutubeArgs {
    pub url: String,

    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    #[arg(short = 'p', long = "priority", default_value_t = Priority::Normal)]
    pub priority: Priority,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct YoutubeBulkArgs {
    /// Read links from this file instead of stdin.
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    #[arg(short = 'p', long = "priority", default_value_t = Priority::Normal)]
    pub priority: Priority,
}

impl GlobalCli {
    pub fn rc_pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.rc_overrides
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Command, GlobalCli, GroupCommand, KeyVal};
    use crate::task::Priority;

    fn parse(args: &[&str]) -> GlobalCli {
        GlobalCli::try_parse_from(std::iter::once("docket").chain(args.iter().copied()))
            .expect("valid command line")
    }

    #[test]
    fn no_subcommand_means_default_listing() {
        let cli = parse(&["-vv"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command, None);
    }

    #[test]
    fn add_collects_title_words_and_flags() {
        let cli = parse(&[
            "add", "Quarterly", "report", "-g", "Work", "-p", "urgent", "--due", "+2d",
        ]);
        let Some(Command::Add(args)) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.title, ["Quarterly", "report"]);
        assert_eq!(args.group.as_deref(), Some("Work"));
        assert_eq!(args.priority, Priority::Urgent);
        assert_eq!(args.due.as_deref(), Some("+2d"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["group", "rm", "Work", "--rc", "color=off", "-q"]);
        assert_eq!(
            cli.command,
            Some(Command::Group(GroupCommand::Rm {
                name: "Work".to_string()
            }))
        );
        assert_eq!(cli.quiet, 1);
        assert_eq!(
            cli.rc_overrides,
            [KeyVal {
                key: "color".to_string(),
                value: "off".to_string()
            }]
        );
    }

    #[test]
    fn edit_rejects_link_and_no_link_together() {
        let result = GlobalCli::try_parse_from([
            "docket",
            "edit",
            "1",
            "--link",
            "https://example.com",
            "--no-link",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn filter_takes_a_group_or_clear() {
        assert_eq!(
            parse(&["filter", "Work"]).command,
            Some(Command::Filter {
                group: Some("Work".to_string()),
                clear: false
            })
        );
        assert_eq!(
            parse(&["search", "--clear"]).command,
            Some(Command::Search {
                query: Vec::new(),
                clear: true
            })
        );
        assert!(GlobalCli::try_parse_from(["docket", "filter"]).is_err());
        assert!(GlobalCli::try_parse_from(["docket", "filter", "Work", "--clear"]).is_err());
    }

    #[test]
    fn keyval_requires_equals() {
        assert!("color".parse::<KeyVal>().is_err());
        assert!("=on".parse::<KeyVal>().is_err());
        let kv: KeyVal = " enrich.delay_ms = 0 ".parse().expect("valid override");
        assert_eq!(kv.key, "enrich.delay_ms");
        assert_eq!(kv.value, "0");
    }
}
