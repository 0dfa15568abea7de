use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use feedpull::feed::{Feed, FetchOptions, Fetched};
use feedpull::{Config, FeedEngine};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "feedpull", version, about = "Fetch, parse and merge RSS / Atom feeds")]
struct Args {
    /// Config file (defaults to ~/.config/feedpull/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a feed document from disk and print it as JSON
    Parse {
        file: PathBuf,
    },
    /// Fetch one or more feeds concurrently
    Fetch {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Print response sizes instead of parsing
        #[arg(long)]
        raw: bool,
    },
    /// Refresh every feed in a JSON state file and write the merged result back
    Update {
        state: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match Config::default_path() {
            Some(path) => path,
            None => return Ok(Config::default()),
        },
    };
    Config::load(&path).with_context(|| format!("Failed to load config '{}'", path.display()))
}

/// Writes to a temp file next to `dst`, then renames over it, so `dst` is
/// never left half-written.
fn atomic_write(dst: &Path, content: &[u8]) -> Result<()> {
    let temp_path = dst.with_extension(format!("tmp.{}", std::process::id()));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temporary file '{}'", temp_path.display()))?;

    if let Err(e) = temp_file.write_all(content).and_then(|_| temp_file.sync_all()) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to write '{}'", temp_path.display()));
    }

    if let Err(e) = std::fs::rename(&temp_path, dst) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to replace '{}'", dst.display()));
    }
    Ok(())
}

fn print_feed_summary(url: &str, feed: &Feed) {
    println!(
        "{url}: {} ({} entries, parser {})",
        feed.title.as_deref().unwrap_or("untitled"),
        feed.entries.len(),
        feed.parser.as_deref().unwrap_or("none"),
    );
}

async fn run_parse(engine: &FeedEngine, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read '{}'", file.display()))?;
    let feed = engine
        .parse_bytes(&bytes)
        .with_context(|| format!("Failed to parse '{}'", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&feed)?);
    Ok(())
}

async fn run_fetch(engine: &FeedEngine, urls: Vec<String>, raw: bool) -> Result<()> {
    let options: FetchOptions = engine
        .default_options()
        .on_success(|url, fetched| match fetched {
            Fetched::Raw(body) => println!("{url}: {} bytes (status {})", body.bytes.len(), body.status),
            Fetched::Feed(feed) => print_feed_summary(url, feed),
        })
        .on_failure(|url, e| eprintln!("{url}: {e}"));

    let failures = if raw {
        let results = engine.fetch_raw_all(urls, &options).await;
        results.values().filter(|r| r.is_err()).count()
    } else {
        let results = engine.fetch_and_parse_all(urls, &options).await;
        results.values().filter(|r| r.is_err()).count()
    };

    if failures > 0 {
        bail!("{failures} feed(s) failed");
    }
    Ok(())
}

async fn run_update(engine: &FeedEngine, state: &Path) -> Result<()> {
    let content = std::fs::read_to_string(state)
        .with_context(|| format!("Failed to read state file '{}'", state.display()))?;
    let feeds: Vec<Feed> = serde_json::from_str(&content)
        .with_context(|| format!("State file '{}' is not a JSON array of feeds", state.display()))?;

    let mut results = engine
        .update_all(feeds.clone(), &engine.default_options())
        .await;

    // Keep the input order; failed feeds stay as they were
    let mut merged = Vec::with_capacity(feeds.len());
    for feed in feeds {
        let Some(url) = feed.feed_url.clone() else {
            merged.push(feed);
            continue;
        };
        match results.remove(&url) {
            Some(Ok(reconciled)) => {
                println!("{url}: {} new", reconciled.new_entries.len());
                for entry in &reconciled.new_entries {
                    println!("  + {}", entry.title.as_deref().unwrap_or("(untitled)"));
                }
                merged.push(reconciled.feed);
            }
            Some(Err(e)) => {
                eprintln!("{url}: {e}");
                merged.push(feed);
            }
            None => merged.push(feed),
        }
    }

    let json = serde_json::to_vec_pretty(&merged)?;
    atomic_write(state, &json)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let engine = FeedEngine::new(config).context("Failed to build HTTP client")?;

    match args.command {
        Command::Parse { file } => run_parse(&engine, &file).await,
        Command::Fetch { urls, raw } => run_fetch(&engine, urls, raw).await,
        Command::Update { state } => run_update(&engine, &state).await,
    }
}
