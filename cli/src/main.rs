//! # sync-probe
//!
//! Command-line client for the gallery API, built on `lib_sync`. Every request
//! goes through the retrying client, so the probe shows what callers
//! experience: attempts taken, classified errors and user-facing messages.
//!
//! `watch` keeps a session open. It prints every bus event, re-lists images
//! through the debounced auto-refresh whenever an image event fires, and reads
//! commands from stdin (`add <json>`, `update <id> <json>`, `delete <id>`,
//! `upload <file>`, `refresh`, `quit`).

mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use lib_sync::events::{BusEvent, EventBus, EventName, Subscription};
use lib_sync::refresh::{AutoRefresh, RefreshOptions};
use lib_sync::retrieve::{NetworkError, RetryConfig};
use lib_sync::{GalleryOps, loggers};
use serde_json::Value;
use static_init::dynamic;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

// load .env files before anything else
#[dynamic]
static DOTENV_INIT: () = {
    dotenvy::dotenv().ok();
};

#[derive(Parser)]
#[clap(
    name = "sync-probe",
    version = "0.1.0",
    author = "ckir",
    about = "Drives the gallery sync layer against a live backend.",
    long_about = "Issues gallery API calls through the retrying client and prints the unwrapped data, \
                  the number of attempts and, on failure, the classified error with its user-facing message."
)]
struct Cli {
    #[clap(flatten)]
    settings: config::SettingsArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// GET a path and print the envelope's data.
    Get {
        /// Path relative to the base URL, e.g. `api/images?page=2`.
        path: String,
        /// Make a single attempt.
        #[clap(long)]
        no_retry: bool,
    },
    /// POST a JSON body to a path.
    Post {
        /// Path relative to the base URL.
        path: String,
        /// Request body as JSON text.
        body: String,
    },
    /// DELETE a path.
    Delete {
        /// Path relative to the base URL.
        path: String,
    },
    /// Upload a file to /api/upload.
    Upload {
        /// File to send.
        file: PathBuf,
        /// MIME type; guessed from the extension when omitted.
        #[clap(long)]
        mime: Option<String>,
    },
    /// Stay connected, print events and auto-refresh the image list.
    Watch {
        /// Events that trigger a refresh.
        #[clap(long, value_delimiter = ',', default_values_t = EventName::IMAGES)]
        events: Vec<EventName>,
        /// Image page to keep refreshed.
        #[clap(long, default_value_t = 1)]
        page: u32,
    },
}

#[tokio::main]
async fn main() {
    let () = *DOTENV_INIT;
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings.resolve().context("loading settings")?;
    let _guard = loggers::setup_logging(&config::log_settings(&settings)).context("setting up logging")?;
    info!(base_url = ?settings.base_url, "sync-probe starting");

    let ops = GalleryOps::new(settings.api_client()?, EventBus::new());

    match cli.command {
        Command::Get { path, no_retry } => {
            let api = ops.api();
            let res = if no_retry {
                api.get_with_retry::<Value>(&path, &RetryConfig::no_retry()).await?
            } else {
                api.get::<Value>(&path).await?
            };
            print_attempts(res.status, res.attempts);
            if let Some(pagination) = &res.pagination {
                println!("{} {}", "Pagination:".bold(), serde_json::to_string(pagination)?);
            }
            print_json(res.data.as_ref());
        }
        Command::Post { path, body } => {
            let body: Value = serde_json::from_str(&body).context("body is not valid JSON")?;
            let res = ops.api().post::<Value, _>(&path, &body).await?;
            print_attempts(res.status, res.attempts);
            print_json(res.data.as_ref());
        }
        Command::Delete { path } => {
            let res = ops.api().delete::<Value>(&path).await?;
            print_attempts(res.status, res.attempts);
            print_json(res.data.as_ref());
        }
        Command::Upload { file, mime } => {
            let _printers = print_events(ops.bus());
            let image = upload(&ops, &file, mime.as_deref()).await?;
            print_json(image.as_ref());
        }
        Command::Watch { events, page } => {
            watch(&ops, &events, page, settings.refresh_options()).await?;
        }
    }
    Ok(())
}

async fn upload(ops: &GalleryOps, file: &Path, mime: Option<&str>) -> Result<Option<Value>> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let mime = mime.or_else(|| guess_mime(file));
    Ok(ops.upload_image(&filename, bytes, mime).await?)
}

fn guess_mime(file: &Path) -> Option<&'static str> {
    let ext = file.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

async fn watch(ops: &GalleryOps, events: &[EventName], page: u32, options: RefreshOptions) -> Result<()> {
    let _printers = print_events(ops.bus());
    let refresher = {
        let lister = ops.clone();
        AutoRefresh::register(ops.bus(), events, options, move || {
            let ops = lister.clone();
            async move {
                if let Err(e) = ops.list_images(page).await {
                    warn!(error = %e, "auto-refresh failed");
                    eprintln!("{} {}", "refresh failed:".red(), e.user_friendly_message);
                }
            }
        })
    };

    let first = ops.list_images(page).await?;
    println!("{} {} image(s) on page {page}", "Loaded".green(), first.data.map_or(0, |d| d.len()));
    println!("{}", "Commands: add <json> | update <id> <json> | delete <id> | upload <file> | refresh | quit".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        if line == "refresh" {
            refresher.trigger();
            continue;
        }
        if let Err(e) = watch_command(ops, line).await {
            report(&e);
        }
    }

    info!(refreshes = refresher.refresh_count(), "watch finished");
    println!("{} after {} refresh(es)", "Stopped".yellow(), refresher.refresh_count());
    Ok(())
}

async fn watch_command(ops: &GalleryOps, line: &str) -> Result<()> {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    match verb {
        "add" => {
            let image: Value = serde_json::from_str(rest).context("image is not valid JSON")?;
            ops.create_image(&image).await?;
        }
        "update" => {
            let (id, body) = rest.split_once(' ').context("usage: update <id> <json>")?;
            let changes: Value = serde_json::from_str(body).context("changes are not valid JSON")?;
            ops.update_image(id, &changes).await?;
        }
        "delete" => ops.delete_image(rest.trim()).await?,
        "upload" => {
            upload(ops, Path::new(rest.trim()), None).await?;
        }
        other => bail!("unknown command '{other}'"),
    }
    Ok(())
}

fn print_events(bus: &EventBus) -> Vec<Subscription> {
    EventName::ALL
        .into_iter()
        .map(|name| bus.subscribe(name, print_event))
        .collect()
}

fn print_event(event: &BusEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{} {json}", "event".cyan()),
        Err(e) => eprintln!("cannot render event {}: {e}", event.name()),
    }
}

fn print_attempts(status: u16, attempts: u32) {
    println!("{} HTTP {status} after {attempts} attempt(s)", "OK".green().bold());
}

fn print_json(data: Option<&Value>) {
    match data {
        Some(value) => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("cannot render data: {e}"),
        },
        None => println!("{}", "(no data)".dimmed()),
    }
}

fn report(e: &anyhow::Error) {
    match e.downcast_ref::<NetworkError>() {
        Some(net) => {
            eprintln!("{} {}", "✖".red().bold(), net.user_friendly_message.red());
            eprintln!(
                "  kind: {}  status: {}  attempts: {}  at: {}",
                net.kind,
                net.status,
                net.attempts,
                net.timestamp.to_rfc3339()
            );
            eprintln!("  detail: {}", net.message);
        }
        None => eprintln!("{} {e:#}", "Error:".red().bold()),
    }
}
