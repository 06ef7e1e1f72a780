use std::future::Future;
use std::sync::OnceLock;
use std::sync::atomic::{
  AtomicU64,
  Ordering
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use tracing::{
  debug,
  info,
  instrument,
  warn
};
use uuid::Uuid;

use crate::error::DocketError;
use crate::state::{
  IdSource,
  TaskBoard
};
use crate::task::{
  Priority,
  Task,
  TaskDraft
};

const OEMBED_ENDPOINT: &str =
  "https://www.youtube.com/oembed";
const WATCH_URL: &str =
  "https://www.youtube.com/watch";
const USER_AGENT: &str = concat!(
  "docket/",
  env!("CARGO_PKG_VERSION")
);

/// Something that can name a link.
///
/// `Ok(None)` means no title was
/// found; errors are transport or parse
/// failures. Callers substitute a
/// fallback title in both cases, so an
/// implementation never invents one.
pub trait TitleLookup {
  fn lookup_title(
    &self,
    url: &str
  ) -> impl Future<
    Output = anyhow::Result<Option<String>>
  > + Send;
}

fn video_id_patterns() -> &'static [Regex]
{
  static PATTERNS: OnceLock<Vec<Regex>> =
    OnceLock::new();
  PATTERNS.get_or_init(|| {
    [
      r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([^&\n?#/]+)",
      r"youtube\.com/watch\?.*v=([^&\n?#]+)"
    ]
    .into_iter()
    .filter_map(|pattern| {
      Regex::new(pattern)
        .inspect_err(|err| {
          tracing::error!(
            pattern,
            error = %err,
            "invalid video id pattern"
          );
        })
        .ok()
    })
    .collect()
  })
}

/// Pulls the opaque video id out of a
/// YouTube watch, short, embed or
/// youtu.be link.
pub fn extract_video_id(
  url: &str
) -> Option<String> {
  video_id_patterns().iter().find_map(
    |re| {
      re.captures(url).and_then(|caps| {
        caps
          .get(1)
          .map(|m| m.as_str().to_string())
      })
    }
  )
}

pub fn is_youtube_url(url: &str) -> bool {
  extract_video_id(url).is_some()
}

/// One link per line; blank lines and
/// anything that is not a YouTube link
/// are dropped.
pub fn parse_link_list(
  text: &str
) -> Vec<String> {
  text
    .lines()
    .map(str::trim)
    .filter(|line| {
      !line.is_empty()
        && is_youtube_url(line)
    })
    .map(ToString::to_string)
    .collect()
}

/// Placeholder for the `index`-th
/// (zero-based) link of a batch.
pub fn fallback_title(
  index: usize
) -> String {
  format!("YouTube Video {}", index + 1)
}

/// Placeholder naming the video
/// itself, for links added one at a
/// time.
pub fn video_fallback_title(
  video_id: &str
) -> String {
  format!("YouTube Video ({video_id})")
}

/// Strips the site suffix and the
/// handful of entities YouTube puts in
/// page titles.
pub fn clean_page_title(
  raw: &str
) -> String {
  let trimmed = raw.trim();
  let without_suffix = trimmed
    .strip_suffix("- YouTube")
    .map(str::trim_end)
    .unwrap_or(trimmed);
  without_suffix
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&amp;", "&")
}

#[derive(Debug, Deserialize)]
struct OembedResponse {
  #[serde(default)]
  title: Option<String>
}

/// Title lookup against YouTube's
/// oEmbed endpoint, falling back to the
/// watch page's `<title>`.
#[derive(Debug, Clone)]
pub struct OembedLookup {
  client: reqwest::Client
}

impl OembedLookup {
  pub fn new(
    timeout: Duration
  ) -> anyhow::Result<Self> {
    let client =
      reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context(
          "failed building HTTP client \
           for title lookup"
        )?;
    Ok(Self { client })
  }

  #[instrument(skip(self))]
  async fn oembed_title(
    &self,
    video_id: &str
  ) -> anyhow::Result<Option<String>> {
    let watch = format!(
      "{WATCH_URL}?v={video_id}"
    );
    let endpoint = Url::parse_with_params(
      OEMBED_ENDPOINT,
      &[
        ("url", watch.as_str()),
        ("format", "json")
      ]
    )
    .context("invalid oEmbed URL")?;

    let response = self
      .client
      .get(endpoint)
      .send()
      .await
      .context("oEmbed request failed")?;
    let status = response.status();
    if !status.is_success() {
      return Err(anyhow!(
        "oEmbed returned HTTP {status}"
      ));
    }

    let body =
      response.text().await.context(
        "failed reading oEmbed body"
      )?;
    let parsed: OembedResponse =
      serde_json::from_str(&body)
        .context(
          "oEmbed body was not JSON"
        )?;
    Ok(
      parsed
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
    )
  }

  #[instrument(skip(self))]
  async fn page_title(
    &self,
    url: &str
  ) -> anyhow::Result<Option<String>> {
    let html = self
      .client
      .get(url)
      .send()
      .await
      .context("page request failed")?
      .error_for_status()
      .context("page request rejected")?
      .text()
      .await
      .context(
        "failed reading page body"
      )?;
    Ok(extract_html_title(&html))
  }
}

impl TitleLookup for OembedLookup {
  async fn lookup_title(
    &self,
    url: &str
  ) -> anyhow::Result<Option<String>> {
    let Some(video_id) =
      extract_video_id(url)
    else {
      debug!(url, "not a YouTube link");
      return Ok(None);
    };

    match self.oembed_title(&video_id).await
    {
      | Ok(Some(title)) => {
        return Ok(Some(title));
      }
      | Ok(None) => {
        debug!(
          video_id = %video_id,
          "oEmbed had no title"
        );
      }
      | Err(err) => {
        warn!(
          video_id = %video_id,
          error = %format!("{err:#}"),
          "oEmbed lookup failed; trying page title"
        );
      }
    }

    match self.page_title(url).await {
      | Ok(title) => Ok(title),
      | Err(err) => {
        warn!(
          video_id = %video_id,
          error = %format!("{err:#}"),
          "page title lookup failed"
        );
        Ok(None)
      }
    }
  }
}

fn extract_html_title(
  html: &str
) -> Option<String> {
  static TITLE_RES: OnceLock<
    Vec<Regex>
  > = OnceLock::new();
  let patterns = TITLE_RES.get_or_init(
    || {
      [
        r"(?i)<title[^>]*>([^<]+)</title>",
        r#"(?i)<meta[^>]*property=["']og:title["'][^>]*content=["']([^"']+)["'][^>]*>"#
      ]
      .into_iter()
      .filter_map(|p| Regex::new(p).ok())
      .collect()
    }
  );

  patterns
    .iter()
    .find_map(|re| {
      re.captures(html).and_then(|caps| {
        caps.get(1).map(|m| {
          clean_page_title(m.as_str())
        })
      })
    })
    .filter(|title| !title.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleSource {
  Lookup,
  Fallback
}

/// A link with the title it will be
/// created under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
  pub url:    String,
  pub title:  String,
  pub source: TitleSource
}

impl ResolvedLink {
  /// Swaps a positional fallback for
  /// one naming the video id. Looked-up
  /// titles are left alone.
  #[must_use]
  pub fn with_video_fallback(
    self
  ) -> Self {
    if self.source != TitleSource::Fallback
    {
      return self;
    }
    match extract_video_id(&self.url) {
      | Some(id) => Self {
        title: video_fallback_title(&id),
        ..self
      },
      | None => self
    }
  }
}

/// Looks up one title, never failing:
/// a missing or failed lookup yields
/// [`fallback_title`] for `index`.
#[instrument(skip(lookup))]
pub async fn resolve_title<L>(
  lookup: &L,
  url: &str,
  index: usize
) -> ResolvedLink
where
  L: TitleLookup + Sync
{
  let (title, source) =
    match lookup.lookup_title(url).await {
      | Ok(Some(title))
        if !title.trim().is_empty() =>
      {
        (
          title.trim().to_string(),
          TitleSource::Lookup
        )
      }
      | Ok(_) => {
        debug!(
          url,
          "no title found; using fallback"
        );
        (
          fallback_title(index),
          TitleSource::Fallback
        )
      }
      | Err(err) => {
        warn!(
          url,
          error = %format!("{err:#}"),
          "title lookup failed; using fallback"
        );
        (
          fallback_title(index),
          TitleSource::Fallback
        )
      }
    };

  ResolvedLink {
    url: url.to_string(),
    title,
    source
  }
}

/// Drafts for a resolved batch, all in
/// one group at one priority.
pub fn drafts_for(
  links: &[ResolvedLink],
  group_id: Uuid,
  priority: Priority
) -> Vec<TaskDraft> {
  links
    .iter()
    .map(|link| {
      TaskDraft::new(
        link.title.clone(),
        group_id
      )
      .with_priority(priority)
      .with_link(link.url.clone())
    })
    .collect()
}

/// Tag for one enrichment batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchToken(u64);

/// Hands out batch tokens and remembers
/// which one is current.
///
/// Resetting the session makes every
/// outstanding token stale; lookups for
/// a stale batch may still finish, but
/// their results are never applied.
#[derive(Debug, Default)]
pub struct EnrichmentSession {
  epoch: AtomicU64
}

impl EnrichmentSession {
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts a batch, superseding any
  /// batch still in flight.
  pub fn begin(&self) -> BatchToken {
    let epoch = self
      .epoch
      .fetch_add(1, Ordering::SeqCst)
      + 1;
    debug!(epoch, "enrichment batch started");
    BatchToken(epoch)
  }

  pub fn reset(&self) {
    let previous = self
      .epoch
      .fetch_add(1, Ordering::SeqCst);
    info!(
      previous,
      "enrichment session reset"
    );
  }

  pub fn is_current(
    &self,
    token: BatchToken
  ) -> bool {
    self.epoch.load(Ordering::SeqCst)
      == token.0
  }

  /// Resolves titles one link at a
  /// time, pausing `delay` between
  /// requests. Stops issuing lookups as
  /// soon as the batch goes stale.
  #[instrument(skip(self, lookup, urls), fields(count = urls.len()))]
  pub async fn resolve_batch<L>(
    &self,
    token: BatchToken,
    lookup: &L,
    urls: &[String],
    delay: Duration
  ) -> Vec<ResolvedLink>
  where
    L: TitleLookup + Sync
  {
    let mut resolved =
      Vec::with_capacity(urls.len());
    for (index, url) in
      urls.iter().enumerate()
    {
      if !self.is_current(token) {
        info!(
          index,
          "batch superseded; stopping lookups"
        );
        break;
      }
      resolved.push(
        resolve_title(lookup, url, index)
          .await
      );
      if index + 1 < urls.len()
        && !delay.is_zero()
      {
        tokio::time::sleep(delay).await;
      }
    }
    resolved
  }

  /// Applies a finished batch as one
  /// create transition. Returns
  /// `Ok(None)` without touching the
  /// board when the batch is stale.
  #[instrument(skip(self, board, drafts), fields(count = drafts.len()))]
  pub fn commit<I: IdSource>(
    &self,
    token: BatchToken,
    board: &mut TaskBoard<I>,
    drafts: Vec<TaskDraft>
  ) -> Result<Option<Vec<Task>>, DocketError>
  {
    if !self.is_current(token) {
      info!(
        ?token,
        "discarding stale enrichment batch"
      );
      return Ok(None);
    }
    board.create_tasks(drafts).map(Some)
  }
}
