use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use feedsync::config::{default_config_path, Config};
use feedsync::delta::{ChangeKind, Reconciler, ScanInterrupted};
use feedsync::feed::{
    discover, ingest, ingest_all, FeedPreference, FeedSource, FetchClient, IngestError,
    NormalizedItem,
};

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Fetch, normalize, and diff RSS/Atom feeds")]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch feeds and print their normalized items as JSON
    Fetch {
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,

        /// Skip TLS certificate verification for these feeds
        #[arg(long)]
        insecure: bool,

        /// Overall deadline per feed, in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Find the feed advertised by a web page
    Discover {
        #[arg(value_name = "URL")]
        url: String,

        #[arg(long, value_enum, default_value_t = Preference::Atom)]
        prefer: Preference,
    },

    /// Re-fetch a feed periodically and print added and removed items
    Poll {
        #[arg(value_name = "URL")]
        url: String,

        /// Seconds between fetches
        #[arg(long, default_value_t = 300)]
        interval: u64,

        #[arg(long)]
        insecure: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Preference {
    Atom,
    Rss,
}

impl From<Preference> for FeedPreference {
    fn from(p: Preference) -> Self {
        match p {
            Preference::Atom => FeedPreference::Atom,
            Preference::Rss => FeedPreference::Rss,
        }
    }
}

fn source_for(url: &str, insecure: bool) -> FeedSource {
    if insecure {
        FeedSource::trust_all(url)
    } else {
        FeedSource::new(url)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match args.config.or_else(default_config_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    let client = FetchClient::new(config.fetch_config())
        .await
        .context("Failed to initialize HTTP client")?;

    match args.command {
        Command::Fetch {
            urls,
            insecure,
            timeout,
        } => {
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.request_timeout());
            run_fetch(&client, urls, insecure, timeout).await
        }
        Command::Discover { url, prefer } => {
            let found = discover(
                &client,
                &FeedSource::new(&url),
                prefer.into(),
                config.request_timeout(),
            )
            .await
            .with_context(|| format!("No feed found at {url}"))?;
            println!("{}", found.feed_url);
            if let Some(title) = found.title {
                println!("{title}");
            }
            Ok(())
        }
        Command::Poll {
            url,
            interval,
            insecure,
        } => {
            run_poll(
                &client,
                source_for(&url, insecure),
                Duration::from_secs(interval.max(1)),
                config.request_timeout(),
            )
            .await
        }
    }
}

async fn run_fetch(
    client: &FetchClient,
    urls: Vec<String>,
    insecure: bool,
    timeout: Duration,
) -> Result<()> {
    let sources: Vec<FeedSource> = urls.iter().map(|u| source_for(u, insecure)).collect();
    let (progress_tx, mut progress_rx) = mpsc::channel(32);

    let progress = tokio::spawn(async move {
        while let Some((done, total)) = progress_rx.recv().await {
            tracing::info!(done, total, "Fetch progress");
        }
    });

    let results = ingest_all(client, Arc::new(sources), timeout, Some(progress_tx)).await;
    // The sender was moved into ingest_all, so the task ends once it returns
    let _ = progress.await;

    let mut feeds = Vec::new();
    let mut failures = 0usize;
    for (source, result) in results {
        match result {
            Ok(feed) => feeds.push(feed),
            Err(e) => {
                failures += 1;
                eprintln!("{}: {e}", source.url);
            }
        }
    }

    let json = serde_json::to_string_pretty(&feeds).context("Failed to serialize feeds")?;
    println!("{json}");

    if failures > 0 && feeds.is_empty() {
        anyhow::bail!("All {failures} feed(s) failed");
    }
    Ok(())
}

async fn run_poll(
    client: &FetchClient,
    source: FeedSource,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let mut reconciler = Reconciler::new(|item: &NormalizedItem| item.id.clone());
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let scan = match ingest(client, &source, timeout).await {
            Ok(feed) => Some(
                feed.items
                    .into_iter()
                    .map(Ok::<_, ScanInterrupted>)
                    .collect::<Vec<_>>(),
            ),
            Err(IngestError::Fetch(e)) => {
                tracing::warn!(url = %source.url, error = %e, "Fetch failed, will retry");
                None
            }
            Err(IngestError::Parse(e)) => {
                tracing::warn!(url = %source.url, error = %e, "Feed did not parse, will retry");
                None
            }
        };

        let delta = match reconciler.reconcile_scan(scan) {
            Ok(delta) => delta,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping this round");
                continue;
            }
        };

        for (item, kind) in delta.iter() {
            let marker = match kind {
                ChangeKind::Added => '+',
                ChangeKind::Removed => '-',
                ChangeKind::Unchanged => continue,
            };
            println!("{marker} {} {}", item.id, item.plain_title);
        }
    }
}
