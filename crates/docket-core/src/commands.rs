use std::fs;
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cli::{
    AddArgs, Command, EditArgs, GroupCommand, ListArgs, YoutubeArgs, YoutubeBulkArgs,
};
use crate::config::Config;
use crate::datastore::{
    DataStore, ExportBundle, default_export_file_name, import_snapshot, write_bundle,
};
use crate::datetime::{Clock, parse_deadline_expr};
use crate::enrich::{EnrichmentSession, OembedLookup, drafts_for, extract_video_id, parse_link_list};
use crate::render::Renderer;
use crate::state::{IdSource, TaskBoard};
use crate::task::{Group, Priority, Task, TaskDraft, TaskPatch};

/// Everything a command needs: the loaded board plus where to save it and how
/// to show it.
pub struct Session<'a, I: IdSource> {
    pub store: &'a DataStore,
    pub cfg: &'a Config,
    pub renderer: &'a mut Renderer,
    pub board: TaskBoard<I>,
}

impl<I: IdSource> Session<'_, I> {
    /// Saves the collections and the filters; a transition may have cleared
    /// the selected group.
    fn persist(&self) {
        self.store.save_snapshot(&self.board.snapshot());
        self.persist_view();
    }

    fn persist_view(&self) {
        self.store.save_view_state(&self.board.view_state());
    }
}

/// The board as the last command left it: stored collections, repaired on
/// load, with the stored filters reapplied.
pub fn restore_board(store: &DataStore, clock: Clock) -> TaskBoard {
    let snapshot = store.load_snapshot();
    let mut board = TaskBoard::from_collections(clock, snapshot.tasks, snapshot.groups);
    board.restore_view(store.load_view_state());
    board
}

#[instrument(skip_all)]
pub fn dispatch<I: IdSource>(session: &mut Session<'_, I>, command: Command) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add(args) => cmd_add(session, args),
        Command::List(args) => cmd_list(session, args),
        Command::Filter { group, .. } => cmd_filter(session, group.as_deref()),
        Command::Search { query, .. } => cmd_search(session, &query.join(" ")),
        Command::Done { tasks } => cmd_done(session, &tasks),
        Command::Edit(args) => cmd_edit(session, args),
        Command::Rm { tasks } => cmd_rm(session, &tasks),
        Command::Info { task } => cmd_info(session, &task),
        Command::Group(GroupCommand::Add { name }) => cmd_group_add(session, &name),
        Command::Group(GroupCommand::List) => {
            let board = &session.board;
            session.renderer.print_groups(board.groups(), board.tasks())
        }
        Command::Group(GroupCommand::Rm { name }) => cmd_group_rm(session, &name),
        Command::Export { path } => cmd_export(session, path.as_deref()),
        Command::Import { path } => cmd_import(session, &path),
        Command::Youtube(args) => cmd_youtube(session, args),
        Command::YoutubeBulk(args) => cmd_youtube_bulk(session, args),
    }
}

#[instrument(skip(session, args))]
fn cmd_add<I: IdSource>(session: &mut Session<'_, I>, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");

    let group = group_for_new_tasks(session, args.group.as_deref())?;
    let mut draft = TaskDraft::new(args.title.join(" "), group.id).with_priority(args.priority);
    if let Some(link) = args.link {
        draft = draft.with_link(link);
    }
    if let Some(due) = args.due.as_deref() {
        draft = draft.with_deadline(parse_deadline_expr(due, session.board.clock())?);
    }

    let task = session.board.create_task(draft)?;
    session.persist();

    println!("Created task {} in {}.", short_id(task.id), group.name);
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_list<I: IdSource>(session: &mut Session<'_, I>, args: ListArgs) -> anyhow::Result<()> {
    info!("command list");

    let before = session.board.view_state();
    if args.all {
        session.board.set_selected_group(None);
        session.board.set_search_query("");
    }
    if let Some(name) = args.group.as_deref() {
        let id = existing_group(&session.board, name)?.id;
        session.board.set_selected_group(Some(id));
    }
    if let Some(query) = args.search {
        session.board.set_search_query(query);
    }
    if session.board.view_state() != before {
        session.persist_view();
    }

    show_view(session)
}

/// `None` clears the group filter.
#[instrument(skip(session))]
fn cmd_filter<I: IdSource>(session: &mut Session<'_, I>, group: Option<&str>) -> anyhow::Result<()> {
    info!("command filter");

    let id = group
        .map(|name| existing_group(&session.board, name).map(|group| group.id))
        .transpose()?;
    session.board.set_selected_group(id);
    session.persist_view();
    show_view(session)
}

/// An empty query clears the search.
#[instrument(skip(session))]
fn cmd_search<I: IdSource>(session: &mut Session<'_, I>, query: &str) -> anyhow::Result<()> {
    info!("command search");

    session.board.set_search_query(query.trim());
    session.persist_view();
    show_view(session)
}

fn show_view<I: IdSource>(session: &mut Session<'_, I>) -> anyhow::Result<()> {
    let board = &session.board;
    let group = board
        .selected_group_id()
        .and_then(|id| board.group(id))
        .map(|group| group.name.as_str());
    session.renderer.print_filters(group, board.search_query())?;
    session
        .renderer
        .print_task_view(&board.view(), board.groups(), board.clock())
}

#[instrument(skip(session))]
fn cmd_done<I: IdSource>(session: &mut Session<'_, I>, refs: &[String]) -> anyhow::Result<()> {
    info!("command done");

    let ids = resolve_task_refs(&session.board, refs)?;
    for id in ids {
        let task = session.board.toggle_task(id)?;
        if task.completed {
            println!("Completed '{}'.", task.title);
        } else {
            println!("Reopened '{}'.", task.title);
        }
    }
    session.persist();
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_edit<I: IdSource>(session: &mut Session<'_, I>, args: EditArgs) -> anyhow::Result<()> {
    info!("command edit");

    let id = resolve_task_ref(&session.board, &args.task)?;
    let mut patch = TaskPatch {
        title: args.title,
        priority: args.priority,
        ..TaskPatch::default()
    };
    if args.no_link {
        patch.link = Some(None);
    } else if let Some(link) = args.link {
        patch.link = Some(Some(link));
    }
    if args.no_due {
        patch.deadline = Some(None);
    } else if let Some(due) = args.due.as_deref() {
        patch.deadline = Some(Some(parse_deadline_expr(due, session.board.clock())?));
    }
    if let Some(name) = args.group.as_deref() {
        patch.group_id = Some(session.board.create_group(name)?.id);
    }

    if patch.is_empty() {
        warn!(task_id = %id, "edit without any changes");
        println!("Nothing to change.");
        return Ok(());
    }

    let task = session.board.update_task(id, patch)?;
    session.persist();
    println!("Updated '{}'.", task.title);
    Ok(())
}

#[instrument(skip(session))]
fn cmd_rm<I: IdSource>(session: &mut Session<'_, I>, refs: &[String]) -> anyhow::Result<()> {
    info!("command rm");

    let ids = resolve_task_refs(&session.board, refs)?;
    for id in ids {
        let task = session.board.delete_task(id)?;
        println!("Deleted '{}'.", task.title);
    }
    session.persist();
    Ok(())
}

#[instrument(skip(session))]
fn cmd_info<I: IdSource>(session: &mut Session<'_, I>, task_ref: &str) -> anyhow::Result<()> {
    let id = resolve_task_ref(&session.board, task_ref)?;
    let board = &session.board;
    let task = board.task(id).ok_or_else(|| anyhow!("task {id} vanished"))?;
    session
        .renderer
        .print_task_info(task, board.groups(), board.clock())
}

#[instrument(skip(session))]
fn cmd_group_add<I: IdSource>(session: &mut Session<'_, I>, name: &str) -> anyhow::Result<()> {
    info!("command group add");

    let before = session.board.groups().len();
    let group = session.board.create_group(name)?;
    if session.board.groups().len() == before {
        println!("Group '{}' already exists.", group.name);
        return Ok(());
    }
    session.persist();
    println!("Created group '{}'.", group.name);
    Ok(())
}

#[instrument(skip(session))]
fn cmd_group_rm<I: IdSource>(session: &mut Session<'_, I>, name: &str) -> anyhow::Result<()> {
    info!("command group rm");

    let id = existing_group(&session.board, name)?.id;
    let removal = session.board.delete_group(id)?;
    session.persist();
    println!(
        "Deleted group '{}' and {} task(s).",
        removal.group.name,
        removal.removed_tasks.len()
    );
    Ok(())
}

#[instrument(skip(session))]
fn cmd_export<I: IdSource>(session: &mut Session<'_, I>, path: Option<&Path>) -> anyhow::Result<()> {
    info!("command export");

    let clock = session.board.clock();
    let bundle = ExportBundle::new(session.board.snapshot(), clock.now_utc());

    match path {
        Some(path) if path == Path::new("-") => {
            let mut out = io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &bundle)?;
            writeln!(out)?;
        }
        Some(path) => {
            write_bundle(path, &bundle)?;
            println!("Exported to {}.", path.display());
        }
        None => {
            let path = default_export_file_name(clock.today());
            write_bundle(Path::new(&path), &bundle)?;
            println!("Exported to {path}.");
        }
    }
    Ok(())
}

#[instrument(skip(session))]
fn cmd_import<I: IdSource>(session: &mut Session<'_, I>, path: &Path) -> anyhow::Result<()> {
    info!("command import");

    let bytes = if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("failed reading backup from stdin")?;
        buf
    } else {
        fs::read(path).with_context(|| format!("failed reading {}", path.display()))?
    };

    let snapshot = import_snapshot(&bytes)
        .with_context(|| format!("cannot import {}", path.display()))?;
    session.board.import(snapshot)?;
    session.persist();

    println!(
        "Imported {} task(s) in {} group(s).",
        session.board.tasks().len(),
        session.board.groups().len()
    );
    Ok(())
}

#[instrument(skip(session, args), fields(url = %args.url))]
fn cmd_youtube<I: IdSource>(session: &mut Session<'_, I>, args: YoutubeArgs) -> anyhow::Result<()> {
    info!("command youtube");

    if extract_video_id(&args.url).is_none() {
        bail!("not a YouTube link: {}", args.url);
    }
    let created = enrich_and_create(
        session,
        args.group.as_deref(),
        args.priority,
        vec![args.url.trim().to_string()],
        true,
    )?;
    for task in &created {
        println!("Created task {} '{}'.", short_id(task.id), task.title);
    }
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_youtube_bulk<I: IdSource>(
    session: &mut Session<'_, I>,
    args: YoutubeBulkArgs,
) -> anyhow::Result<()> {
    info!("command youtube-bulk");

    let text = match args.file.as_deref() {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed reading links from stdin")?;
            buf
        }
    };

    let urls = parse_link_list(&text);
    if urls.is_empty() {
        bail!("no YouTube links found");
    }
    debug!(count = urls.len(), "parsed link list");

    let created = enrich_and_create(session, args.group.as_deref(), args.priority, urls, false)?;
    println!("Created {} task(s).", created.len());
    Ok(())
}

/// Looks up titles for `urls` and creates one task per link in a single
/// board transition. Links without a title are named by position, or by
/// video id when `name_by_video` is set.
fn enrich_and_create<I: IdSource>(
    session: &mut Session<'_, I>,
    group: Option<&str>,
    priority: Priority,
    urls: Vec<String>,
    name_by_video: bool,
) -> anyhow::Result<Vec<Task>> {
    let group = group_for_new_tasks(session, group)?;
    let lookup = OembedLookup::new(session.cfg.enrich_timeout())?;
    let delay = session.cfg.enrich_delay();

    let enrichment = EnrichmentSession::new();
    let token = enrichment.begin();
    let mut links = block_on(enrichment.resolve_batch(token, &lookup, &urls, delay))?;
    if name_by_video {
        links = links.into_iter().map(|link| link.with_video_fallback()).collect();
    }

    let drafts = drafts_for(&links, group.id, priority);
    let created = enrichment
        .commit(token, &mut session.board, drafts)?
        .ok_or_else(|| anyhow!("enrichment batch was superseded"))?;
    session.persist();
    Ok(created)
}

fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// The named group, created when missing, or the configured default group.
fn group_for_new_tasks<I: IdSource>(
    session: &mut Session<'_, I>,
    name: Option<&str>,
) -> anyhow::Result<Group> {
    let name = match name {
        Some(name) => name.to_string(),
        None => session
            .cfg
            .get("default.group")
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| anyhow!("no group given and default.group is not set"))?,
    };
    let before = session.board.groups().len();
    let group = session.board.create_group(&name)?;
    if session.board.groups().len() > before {
        debug!(group = %group.name, "created group for new tasks");
    }
    Ok(group)
}

fn existing_group<'b, I: IdSource>(board: &'b TaskBoard<I>, name: &str) -> anyhow::Result<&'b Group> {
    board
        .find_group_by_name(name)
        .ok_or_else(|| anyhow!("no group named '{}'", name.trim()))
}

/// Resolves every reference before anything changes, so numbered
/// references all refer to the listing the user saw.
fn resolve_task_refs<I: IdSource>(board: &TaskBoard<I>, refs: &[String]) -> anyhow::Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(refs.len());
    for raw in refs {
        let id = resolve_task_ref(board, raw)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// A task reference is either its row number in the current listing, under
/// the stored filters, or a prefix of its id.
pub fn resolve_task_ref<I: IdSource>(board: &TaskBoard<I>, raw: &str) -> anyhow::Result<Uuid> {
    let token = raw.trim();
    if token.is_empty() {
        bail!("empty task reference");
    }

    if let Ok(number) = token.parse::<usize>() {
        return number
            .checked_sub(1)
            .and_then(|idx| board.view().iter().nth(idx))
            .map(|task| task.id)
            .ok_or_else(|| anyhow!("no task number {number}"));
    }

    let prefix = token.to_ascii_lowercase();
    let mut matches = board
        .tasks()
        .iter()
        .filter(|task| task.id.to_string().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous task reference: {token}")),
        (None, _) => Err(anyhow!("no task matches: {token}")),
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
