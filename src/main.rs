use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use rookery::config::Config;
use rookery::engine::{Engine, PollOutcome};
use rookery::feed::HttpFetcher;
use rookery::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/rookery/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("rookery"))
}

#[derive(Parser, Debug)]
#[command(name = "rookery", about = "Multi-user feed ingestion service")]
struct Args {
    /// Path to config file (default: ~/.config/rookery/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a feed without subscribing anyone to it
    AddFeed {
        /// Feed link (the fetch URL)
        link: String,
        /// Initial title, until the first fetched document supplies one
        #[arg(long, default_value = "")]
        title: String,
    },
    /// Subscribe a user to a feed, creating the feed if needed
    Subscribe {
        #[arg(long)]
        user: i64,
        link: String,
    },
    /// Remove a user's subscription and their read state for the feed
    Unsubscribe {
        #[arg(long)]
        user: i64,
        link: String,
    },
    /// Poll due feeds once, or continuously with --watch
    Poll {
        /// Keep polling on the configured interval instead of exiting
        #[arg(long)]
        watch: bool,
        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<i64>,
        /// Poll a single feed by link, ignoring its schedule window
        #[arg(long, value_name = "LINK")]
        feed: Option<String>,
    },
    /// List the feeds a user is subscribed to
    Feeds {
        #[arg(long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the database is locked by another rookery instance.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let fetcher = HttpFetcher::new(Duration::from_secs(config.fetch_timeout_secs));
    let engine = Engine::new(db, fetcher, config.max_concurrent_polls);

    match args.command {
        Command::AddFeed { link, title } => {
            let feed = engine.add_feed(&link, &title).await?;
            println!("Feed {}: {}", feed.id, feed.link);
        }
        Command::Subscribe { user, link } => {
            let subscription = engine.subscribe(user, &link).await?;
            println!(
                "User {} subscribed to feed {} (subscription {})",
                user, subscription.feed_id, subscription.id
            );
        }
        Command::Unsubscribe { user, link } => {
            engine.unsubscribe(user, &link).await?;
            println!("User {} unsubscribed from {}", user, link);
        }
        Command::Poll {
            watch,
            batch_size,
            feed,
        } => {
            if let Some(link) = feed {
                let outcome = engine.poll_one(&link).await?;
                println!("{}: {:?}", link, outcome);
                return Ok(());
            }

            let batch = batch_size.unwrap_or(config.batch_size);
            loop {
                let results = engine.poll_due_feeds(batch).await?;
                report_cycle(&results);
                if !watch {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(config.watch_interval_minutes * 60)).await;
            }
        }
        Command::Feeds { user } => {
            for feed in engine.feeds_for_user(user).await? {
                println!("{}\t{}\t{}", feed.id, feed.frequency.as_str(), feed.link);
            }
        }
    }

    Ok(())
}

fn report_cycle(results: &[(i64, PollOutcome)]) {
    let mut ingested = 0usize;
    let mut failed = 0usize;
    let mut created = 0usize;
    for (_, outcome) in results {
        match outcome {
            PollOutcome::Ingested(stats) => {
                ingested += 1;
                created += stats.created;
            }
            PollOutcome::FetchFailed => failed += 1,
            PollOutcome::NotDue | PollOutcome::Disabled => {}
        }
    }
    println!(
        "Polled {} feeds: {} ingested, {} failed, {} new items",
        results.len(),
        ingested,
        failed,
        created
    );
}
