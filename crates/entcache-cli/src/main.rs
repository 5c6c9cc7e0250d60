//! entcache - inspect, edit and synchronize an offline contact cache.
//!
//! The cache lives in a JSON snapshot under the platform cache directory.
//! Edits are saved locally and stay pending until `push` (or `--push` on the
//! edit) sends them to the configured server. `pull` replaces the local
//! cache with the server's data and is refused while changes are pending.

mod commands;
mod contact;
mod credentials;
mod pending;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use entcache_core::Config;

/// Log file name inside the cache directory
const LOG_FILE: &str = "entcache.log";

#[derive(Parser)]
#[command(name = "entcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Snapshot file to use instead of the configured cache directory
    #[arg(global = true, long)]
    cache_file: Option<PathBuf>,

    /// Server base URL
    #[arg(global = true, long, env = "ENTCACHE_SERVER_URL")]
    server_url: Option<String>,

    /// Bearer token, overrides the one stored in the keychain
    #[arg(global = true, long, env = "ENTCACHE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Also write logs to a file in the cache directory
    #[arg(global = true, long)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List cached contacts, optionally filtered
    List {
        /// Filter condition, `field=value`; may be repeated
        #[arg(short = 'w', long = "where", value_name = "FIELD=VALUE")]
        filters: Vec<String>,

        /// Require exact values instead of case-insensitive substring matches
        #[arg(short, long)]
        exact: bool,
    },

    /// Show every field of one contact
    Show { id: i64 },

    /// Add a contact
    Add {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "active")]
        status: String,
        #[arg(long)]
        email: Option<String>,

        /// Push the change to the server right away
        #[arg(long)]
        push: bool,
    },

    /// Change fields of a contact
    Set {
        id: i64,

        /// Assignment, `field=value`; may be repeated
        #[arg(required = true, value_name = "FIELD=VALUE")]
        assignments: Vec<String>,

        #[arg(long)]
        push: bool,
    },

    /// Delete a contact
    Delete {
        id: i64,

        #[arg(long)]
        push: bool,
    },

    /// Export contacts to CSV (`-` for stdout)
    Export {
        path: PathBuf,

        #[arg(short = 'w', long = "where", value_name = "FIELD=VALUE")]
        filters: Vec<String>,

        #[arg(short, long)]
        exact: bool,

        /// Write display-style column headers ("Last Seen")
        #[arg(long)]
        shape: bool,
    },

    /// Replace the cache with the rows of a CSV file
    Import {
        path: PathBuf,

        /// The file uses display-style column headers
        #[arg(long)]
        shape: bool,
    },

    /// Send pending changes to the server
    Push,

    /// Replace the cache with the server's contacts
    Pull,

    /// Show cache and configuration details
    Info,

    /// Store a bearer token in the OS keychain
    Login {
        #[arg(long)]
        username: String,

        /// Token to store; read from ENTCACHE_TOKEN when omitted
        #[arg(long = "with-token", value_name = "TOKEN")]
        new_token: Option<String>,
    },

    /// Remove the stored token for the last user
    Logout,
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=entcache_core=debug).
fn init_tracing(config: &Config, log_file: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file.then(|| config.cache_dir()).and_then(|d| d.ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    let _guard = init_tracing(&config, cli.log_file);
    info!("entcache starting");

    if let Some(url) = cli.server_url {
        config.server_url = Some(url);
    }
    let mut session = commands::Session::open(config, cli.cache_file, cli.token)?;

    match cli.command {
        Command::List { filters, exact } => session.list(&filters, exact),
        Command::Show { id } => session.show(id),
        Command::Add {
            id,
            name,
            status,
            email,
            push,
        } => session.add(id, name, status, email, push).await,
        Command::Set {
            id,
            assignments,
            push,
        } => session.set(id, &assignments, push).await,
        Command::Delete { id, push } => session.delete(id, push).await,
        Command::Export {
            path,
            filters,
            exact,
            shape,
        } => session.export(&path, &filters, exact, shape),
        Command::Import { path, shape } => session.import(&path, shape),
        Command::Push => session.push().await,
        Command::Pull => session.pull().await,
        Command::Info => session.info(),
        Command::Login {
            username,
            new_token,
        } => session.login(&username, new_token),
        Command::Logout => session.logout(),
    }
}
