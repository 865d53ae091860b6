mod config;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use toggl_cache::cache::SqlRecord;
use toggl_cache::http::HttpTransport;
use toggl_cache::models::{Client, Organization, Project, Tag, Tracker, Workspace};
use toggl_cache::{
  AsyncCache, AsyncCacheBackend, AsyncCachedEndpoint, CacheQuery, CacheResult, CacheSource,
  Comparison, EntityKind, JsonCache, SqliteCache, Value,
};

use config::{BackendKind, Config};

#[derive(Parser, Debug)]
#[command(name = "toggl-cache")]
#[command(about = "Query Toggl Track data through a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/toggl-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file in the cache directory
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List every entity of a kind
  List {
    kind: EntityKind,
    /// Skip the cache and fetch from the API
    #[arg(long)]
    refresh: bool,
  },
  /// Show a single entity
  Get {
    kind: EntityKind,
    id: i64,
    #[arg(long)]
    refresh: bool,
  },
  /// Filter cached entities, e.g. `query trackers project = 12`
  Query {
    kind: EntityKind,
    key: String,
    op: Comparison,
    value: String,
    /// Drop results whose queried value was already seen
    #[arg(long)]
    distinct: bool,
  },
  /// Show the running time entry
  Current {
    /// Answer from the cache only
    #[arg(long)]
    cached: bool,
  },
}

type SharedCache<T> = Arc<dyn AsyncCacheBackend<T>>;
type Endpoint<T> = AsyncCachedEndpoint<T, SharedCache<T>, HttpTransport>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_logging(args.log_stderr, &config.cache_dir()?)?;

  match &args.command {
    Command::List { kind, .. } | Command::Get { kind, .. } | Command::Query { kind, .. } => match kind {
      EntityKind::Organization => run(open::<Organization>(&config).await?, &args.command).await,
      EntityKind::Workspace => run(open::<Workspace>(&config).await?, &args.command).await,
      EntityKind::Client => run(open::<Client>(&config).await?, &args.command).await,
      EntityKind::Project => run(open::<Project>(&config).await?, &args.command).await,
      EntityKind::Tag => run(open::<Tag>(&config).await?, &args.command).await,
      EntityKind::Tracker => run(open::<Tracker>(&config).await?, &args.command).await,
    },
    Command::Current { cached } => {
      let endpoint = open::<Tracker>(&config).await?;
      let result = endpoint.current_tracker(!cached).await?;
      report(&result);
      if let Some(tracker) = &result.data {
        print_entity(tracker)?;
      }
      endpoint.shutdown().await?;
      Ok(())
    }
  }
}

fn init_logging(log_stderr: bool, dir: &Path) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_env("TOGGL_CACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  if log_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .with_target(false)
      .init();
    return Ok(None);
  }

  std::fs::create_dir_all(dir)?;
  let appender = tracing_appender::rolling::daily(dir, "toggl-cache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Ok(Some(guard))
}

/// Build an endpoint for `T` with the configured backend attached.
async fn open<T: SqlRecord>(config: &Config) -> Result<Endpoint<T>> {
  let transport = HttpTransport::new(&config.api.url, Config::credentials()?, config.timeout())?;
  let dir = config.cache_dir()?;

  let cache: SharedCache<T> = match config.cache.backend {
    BackendKind::Json => Arc::new(AsyncCache::new(
      JsonCache::<T>::new(&dir)
        .with_expire_after(config.expire_after())
        .with_max_length(config.cache.max_length),
    )),
    BackendKind::Sqlite => Arc::new(AsyncCache::new(
      SqliteCache::<T>::new(&dir).with_expire_after(config.expire_after()),
    )),
  };

  let mut endpoint = Endpoint::<T>::new(Arc::new(transport)).with_policy(config.retry_policy());
  if let Some(workspace) = config.api.workspace_id {
    endpoint = endpoint.with_workspace(workspace);
  }
  Ok(endpoint.with_cache(cache).await?)
}

async fn run<T: SqlRecord>(endpoint: Endpoint<T>, command: &Command) -> Result<()> {
  match command {
    Command::List { refresh, .. } => {
      let result = endpoint.collect(*refresh).await?;
      report(&result);
      for entity in &result.data {
        print_entity(entity)?;
      }
    }
    Command::Get { id, refresh, .. } => {
      let result = endpoint.get(*id, *refresh).await?;
      report(&result);
      match &result.data {
        Some(entity) => print_entity(entity)?,
        None => eprintln!("{} {} not found", T::kind(), id),
      }
    }
    Command::Query {
      key,
      op,
      value,
      distinct,
      ..
    } => {
      let query = CacheQuery::new(key.as_str(), Value::parse_literal(value), *op)?;
      for entity in endpoint.query(vec![query], *distinct).await? {
        print_entity(&entity)?;
      }
    }
    Command::Current { .. } => {}
  }
  endpoint.shutdown().await?;
  Ok(())
}

fn report<T>(result: &CacheResult<T>) {
  let source = match result.source {
    CacheSource::Cache => "cache",
    CacheSource::Network => "network",
  };
  info!(source, "request served");
}

fn print_entity<T: serde::Serialize>(entity: &T) -> Result<()> {
  println!("{}", serde_json::to_string(entity)?);
  Ok(())
}
