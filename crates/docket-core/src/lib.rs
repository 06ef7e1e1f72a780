pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod deadline;
pub mod enrich;
pub mod error;
pub mod ordering;
pub mod render;
pub mod state;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::{
  DocketError,
  ImportError
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting docket"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(cli.rc_pairs());
  debug!(files = ?cfg.loaded_files, "configuration loaded");

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let timezone =
    datetime::resolve_timezone(
      cfg.timezone().as_deref()
    );
  let clock =
    datetime::Clock::with_timezone(
      timezone
    );
  let board =
    commands::restore_board(
      &store, clock
    );

  let mut renderer =
    render::Renderer::new(&cfg);
  let mut session = commands::Session {
    store: &store,
    cfg: &cfg,
    renderer: &mut renderer,
    board
  };

  let command = cli.command.unwrap_or(
    cli::Command::List(
      cli::ListArgs::default()
    )
  );
  commands::dispatch(
    &mut session,
    command
  )?;

  info!("done");
  Ok(())
}
