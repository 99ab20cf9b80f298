//! geo-filter CLI entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use geo_filter::settings::{block_country, set_display_mode, unblock_country};
use geo_filter::{
    extract_author, find_country, load_snapshot, AuthorId, DisplayMode, FeedDocument, FileStore,
    FilterSettings, GeoClassification, HtmlFeed, KeyValueStore, COUNTRIES,
};
use geo_filter_runtime::bridge::{LookupBackend, PrivilegedBridge, TableLookup};
use geo_filter_runtime::cache::{Resolution, ResolutionCache};
use geo_filter_runtime::config::{resolve_store_path, RuntimeConfig};
use geo_filter_runtime::pipeline::{observe, Pipeline};
use geo_filter_runtime::transport::stdio::stdio_endpoint;
use geo_filter_runtime::transport::{duplex, BridgeProcess, Endpoint};
use geo_filter_runtime::types::{LookupError, RuntimeError, RuntimeResult};

#[derive(Parser)]
#[command(
    name = "geo-filter",
    about = "Filter feed items by the account location of their authors",
    version
)]
struct Cli {
    /// Path to the .geos settings store.
    #[arg(short, long, global = true)]
    store: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Where the privileged lookup bridge runs.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum BridgeMode {
    /// Same process, over an in-memory message channel.
    Inproc,
    /// Child process speaking line-delimited JSON over stdio.
    Process,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter an HTML page and print the state of every feed item as JSON.
    Run {
        /// HTML page holding the initial feed.
        #[arg(long)]
        page: PathBuf,

        /// HTML fragments appended one batch at a time after the first pass.
        #[arg(long)]
        append: Vec<PathBuf>,

        /// JSON table of author → location text, instead of live lookups.
        #[arg(long)]
        lookup_table: Option<PathBuf>,

        /// Where the lookup bridge runs.
        #[arg(long, value_enum, default_value_t = BridgeMode::Inproc)]
        bridge: BridgeMode,

        /// Pause between appended batches, in milliseconds.
        #[arg(long, default_value_t = 50)]
        settle_ms: u64,

        /// Write the filtered items as HTML to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Serve lookup requests over stdio (privileged side).
    Bridge {
        /// JSON table of author → location text, instead of live lookups.
        #[arg(long)]
        lookup_table: Option<PathBuf>,
    },

    /// Resolve one author through the bridge and print the classification.
    Resolve {
        author: String,

        /// JSON table of author → location text, instead of live lookups.
        #[arg(long)]
        lookup_table: Option<PathBuf>,

        /// Where the lookup bridge runs.
        #[arg(long, value_enum, default_value_t = BridgeMode::Inproc)]
        bridge: BridgeMode,
    },

    /// Classify free-form location text.
    Classify { text: String },

    /// List the countries that can be blocked.
    Countries,

    /// Add a country to the blocklist.
    Block { code: String },

    /// Remove a country from the blocklist.
    Unblock { code: String },

    /// Set how blocked items are presented (hide or overlay).
    Mode { mode: String },

    /// Show statistics for the persisted location cache.
    Cache,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   geo-filter completions bash > ~/.local/share/bash-completion/completions/geo-filter
    ///   geo-filter completions zsh > ~/.zfunc/_geo-filter
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RuntimeConfig::from_env();

    match cli.command {
        Commands::Run {
            page,
            append,
            lookup_table,
            bridge,
            settle_ms,
            output,
        } => {
            let store = open_store(cli.store.as_deref())?;
            let connection = connect(bridge, lookup_table.as_deref(), &config, &cli.log_level)?;
            run(
                store,
                connection,
                &config,
                &page,
                &append,
                output.as_deref(),
                Duration::from_millis(settle_ms),
            )
            .await?;
        }

        Commands::Bridge { lookup_table } => {
            let backend = lookup_backend(lookup_table.as_deref(), &config)?;
            PrivilegedBridge::new(backend).serve(stdio_endpoint()).await?;
        }

        Commands::Resolve {
            author,
            lookup_table,
            bridge,
        } => {
            let connection = connect(bridge, lookup_table.as_deref(), &config, &cli.log_level)?;
            let (cache, receiver) =
                ResolutionCache::connect(connection.endpoint, config.lookup_timeout);
            let outcome = resolve_one(&cache, &AuthorId::new(author), &config).await;
            receiver.abort();
            connection.bridge.shutdown().await;

            match outcome {
                Ok(classification) => {
                    println!("{}", serde_json::to_string_pretty(&classification)?);
                }
                Err(e) => {
                    eprintln!("Lookup failed ({}): {e}", e.code());
                    std::process::exit(1);
                }
            }
        }

        Commands::Classify { text } => {
            let classification = GeoClassification::from_location_text(text, Utc::now());
            match classification
                .country_code
                .as_ref()
                .and_then(|code| find_country(code.as_str()))
            {
                Some(country) => println!("{} {} {}", country.flag, country.code, country.name),
                None => println!("unrecognized"),
            }
        }

        Commands::Countries => {
            let store = open_store(cli.store.as_deref())?;
            let settings = FilterSettings::load(store.as_ref()).await?;
            for country in COUNTRIES {
                let blocked = settings
                    .blocked
                    .iter()
                    .any(|code| code.as_str() == country.code);
                let mark = if blocked { "*" } else { " " };
                println!("{mark} {} {} {}", country.flag, country.code, country.name);
            }
            println!();
            println!("Display mode: {}", settings.mode.as_str());
        }

        Commands::Block { code } => {
            let store = open_store(cli.store.as_deref())?;
            let code = block_country(store.as_ref(), &code).await?;
            println!("Blocked {code}");
        }

        Commands::Unblock { code } => {
            let store = open_store(cli.store.as_deref())?;
            if unblock_country(store.as_ref(), &code).await? {
                println!("Unblocked {}", code.to_ascii_uppercase());
            } else {
                println!("{} was not blocked", code.to_ascii_uppercase());
            }
        }

        Commands::Mode { mode } => {
            let mode: DisplayMode = mode.parse()?;
            let store = open_store(cli.store.as_deref())?;
            set_display_mode(store.as_ref(), mode).await?;
            println!("Display mode: {}", mode.as_str());
        }

        Commands::Cache => {
            let store = open_store(cli.store.as_deref())?;
            let snapshot = load_snapshot(store.as_ref()).await?;
            let classified = snapshot
                .values()
                .filter(|c| c.country_code.is_some())
                .count();
            let mut by_country = std::collections::BTreeMap::<String, usize>::new();
            for code in snapshot.values().filter_map(|c| c.country_code.as_ref()) {
                *by_country.entry(code.to_string()).or_default() += 1;
            }
            let info = serde_json::json!({
                "store": resolve_store_path(cli.store.as_deref()),
                "entries": snapshot.len(),
                "classified": classified,
                "unclassified": snapshot.len() - classified,
                "by_country": by_country,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "geo-filter", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn open_store(explicit: Option<&str>) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let path = resolve_store_path(explicit);
    tracing::debug!("Store: {path}");
    Ok(Arc::new(FileStore::open(path)?))
}

/// The consuming side's endpoint plus whatever keeps the bridge alive.
struct Connection {
    endpoint: Endpoint,
    bridge: BridgeHandle,
}

enum BridgeHandle {
    InProcess(JoinHandle<RuntimeResult<()>>),
    Child(BridgeProcess),
}

impl BridgeHandle {
    async fn shutdown(self) {
        match self {
            BridgeHandle::InProcess(handle) => handle.abort(),
            BridgeHandle::Child(process) => {
                if let Err(e) = process.shutdown().await {
                    tracing::warn!("Bridge process did not exit cleanly: {e}");
                }
            }
        }
    }
}

fn connect(
    mode: BridgeMode,
    lookup_table: Option<&Path>,
    config: &RuntimeConfig,
    log_level: &str,
) -> anyhow::Result<Connection> {
    match mode {
        BridgeMode::Inproc => {
            let backend = lookup_backend(lookup_table, config)?;
            let (consumer, privileged) = duplex();
            let handle = PrivilegedBridge::new(backend).spawn(privileged);
            Ok(Connection {
                endpoint: consumer,
                bridge: BridgeHandle::InProcess(handle),
            })
        }
        BridgeMode::Process => {
            let exe = std::env::current_exe()?;
            let mut args = vec![
                "--log-level".to_string(),
                log_level.to_string(),
                "bridge".to_string(),
            ];
            if let Some(path) = lookup_table {
                args.push("--lookup-table".to_string());
                args.push(path.display().to_string());
            }
            let (process, endpoint) = BridgeProcess::spawn(&exe, &args)?;
            Ok(Connection {
                endpoint,
                bridge: BridgeHandle::Child(process),
            })
        }
    }
}

fn lookup_backend(
    lookup_table: Option<&Path>,
    config: &RuntimeConfig,
) -> anyhow::Result<Arc<dyn LookupBackend>> {
    match lookup_table {
        Some(path) => Ok(Arc::new(TableLookup::from_file(path)?)),
        None => default_backend(config),
    }
}

#[cfg(feature = "http")]
fn default_backend(config: &RuntimeConfig) -> anyhow::Result<Arc<dyn LookupBackend>> {
    use geo_filter_runtime::bridge::HttpLookup;
    Ok(Arc::new(HttpLookup::new(
        config.api.clone(),
        config.lookup_timeout,
    )?))
}

#[cfg(not(feature = "http"))]
fn default_backend(_config: &RuntimeConfig) -> anyhow::Result<Arc<dyn LookupBackend>> {
    anyhow::bail!("--lookup-table is required when built without the http feature")
}

async fn resolve_one(
    cache: &ResolutionCache,
    author: &AuthorId,
    config: &RuntimeConfig,
) -> RuntimeResult<GeoClassification> {
    match cache.resolve_detailed(author).await {
        Resolution::Cached(c) | Resolution::Resolved(c) => Ok(c),
        Resolution::Failed(message) => Err(LookupError::Remote(message).into()),
        Resolution::TimedOut => Err(RuntimeError::Timeout(
            config.lookup_timeout.as_millis() as u64,
        )),
        Resolution::Unavailable => Err(RuntimeError::ChannelClosed),
        Resolution::Coalesced => Err(RuntimeError::InternalError(format!(
            "Lookup for {author} already in flight"
        ))),
    }
}

async fn run(
    store: Arc<dyn KeyValueStore>,
    connection: Connection,
    config: &RuntimeConfig,
    page: &Path,
    append: &[PathBuf],
    output: Option<&Path>,
    settle: Duration,
) -> anyhow::Result<()> {
    let settings = FilterSettings::load(store.as_ref()).await?;
    tracing::info!(
        "Blocking {} countries, mode {}",
        settings.blocked.len(),
        settings.mode.as_str()
    );

    let (cache, receiver) = ResolutionCache::connect(connection.endpoint, config.lookup_timeout);
    if let Err(e) = cache.restore(store.as_ref()).await {
        tracing::warn!("Ignoring unreadable location cache: {e}");
    }
    let snapshot_shutdown = Arc::new(Notify::new());
    let snapshots = cache.spawn_snapshot_task(
        Arc::clone(&store),
        config.snapshot_interval,
        Arc::clone(&snapshot_shutdown),
    );

    let feed = HtmlFeed::from_page(&std::fs::read_to_string(page)?);
    tracing::info!("Loaded {} feed items from {}", feed.len(), page.display());
    let mutations = observe(feed.mutations());
    let changes = store.subscribe();

    let pipeline = Arc::new(Pipeline::new(feed, Arc::clone(&cache), settings));
    let pipeline_shutdown = Arc::new(Notify::new());
    let runner = tokio::spawn(Arc::clone(&pipeline).run(
        mutations,
        changes,
        Arc::clone(&pipeline_shutdown),
    ));

    for path in append {
        let html = std::fs::read_to_string(path)?;
        let added = pipeline.document().lock().await.append_page(&html);
        tracing::info!("Appended {} items from {}", added.len(), path.display());
        tokio::time::sleep(settle).await;
    }

    let deadline = tokio::time::Instant::now() + config.lookup_timeout + Duration::from_secs(1);
    while !pipeline.is_settled().await {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("Gave up waiting for outstanding lookups");
            break;
        }
        tokio::time::sleep(settle.max(Duration::from_millis(10))).await;
    }

    pipeline_shutdown.notify_one();
    if let Err(e) = runner.await {
        tracing::error!("Pipeline task failed: {e}");
    }
    snapshot_shutdown.notify_one();
    if let Err(e) = snapshots.await {
        tracing::error!("Snapshot task failed: {e}");
    }
    cache.persist(store.as_ref()).await?;
    receiver.abort();
    connection.bridge.shutdown().await;

    let doc = pipeline.document().lock().await;
    if let Some(path) = output {
        std::fs::write(path, doc.render())?;
        tracing::info!("Wrote filtered feed to {}", path.display());
    }
    let items: Vec<serde_json::Value> = doc
        .items()
        .into_iter()
        .map(|item| {
            serde_json::json!({
                "index": item.0,
                "author": doc.markup(item).and_then(extract_author),
                "state": doc.state(item),
            })
        })
        .collect();
    let report = serde_json::json!({
        "items": items,
        "cache": cache.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
