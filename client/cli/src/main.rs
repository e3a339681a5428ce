//! FileFreezer CLI client (freezer).

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod chunking;
mod config;
mod crypto;
mod error;
mod sync;
mod walker;

use api::ApiClient;
use config::Config;
use crypto::KeySet;
use sync::{SyncStatus, SyncTarget, Syncer};

#[derive(Parser)]
#[command(name = "freezer")]
#[command(about = "FileFreezer sync client", long_about = None)]
struct Cli {
    /// Server base URL (e.g. http://localhost:8080)
    #[arg(long, env = "FREEZER_SERVER")]
    server: Option<String>,

    /// Username to authenticate as
    #[arg(long, env = "FREEZER_USER")]
    user: Option<String>,

    /// Login password; prompted for when not given
    #[arg(long)]
    password: Option<String>,

    /// Data passphrase; prompted for when not given
    #[arg(long, env = "FREEZER_PASSPHRASE")]
    passphrase: Option<String>,

    /// Verify per-chunk hashes even when whole-file hashes match
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save server URL and username as defaults
    Configure {
        server: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Show quota, allocation and revision for the logged-in user
    Userstats,
    /// List all remote files
    Getfiles,
    /// Upload one file or directory entry
    Addfile { local: PathBuf, remote: String },
    /// Remove a remote file and all its versions
    Rmfile { remote: String },
    /// Remove a range of a remote file's versions (inclusive)
    Rmfileversions {
        remote: String,
        min_version: i64,
        max_version: i64,
    },
    /// List the versions of a remote file
    Getversions { remote: String },
    /// Reconcile one local path against one remote path
    Sync {
        local: PathBuf,
        remote: String,
        /// Sync a specific version instead of the current one
        #[arg(long)]
        version: Option<i64>,
    },
    /// Reconcile a local directory tree against a remote prefix
    Syncdir { local: PathBuf, remote: String },
}

struct Session {
    api: ApiClient,
    keys: Option<KeySet>,
    chunk_size: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load().unwrap_or_default();

    match &cli.command {
        Commands::Configure { server, user } => {
            let cfg = Config {
                server_url: Some(server.clone()),
                user: user.clone().or(cfg.user),
            };
            cfg.save()?;
            println!("saved {}", Config::config_path()?.display());
            return Ok(());
        }
        Commands::Userstats => {
            let session = connect(&cli, &cfg, false).await?;
            let stats = session.api.get_user_stats().await?;
            println!("quota:     {} bytes", stats.quota);
            println!("allocated: {} bytes", stats.allocated);
            println!("revision:  {}", stats.revision);
        }
        Commands::Getfiles => {
            let session = connect(&cli, &cfg, true).await?;
            let keys = session.keys.as_ref().unwrap();
            for info in session.api.get_all_files().await? {
                let name = keys.open_filename(&info.file_name)?;
                let kind = if info.is_dir { "dir " } else { "file" };
                println!(
                    "{:>6}  {}  v{}  {}",
                    info.file_id, kind, info.current_version.version_number, name
                );
            }
        }
        Commands::Addfile { local, remote } | Commands::Sync {
            local,
            remote,
            version: None,
        } => {
            let session = connect(&cli, &cfg, true).await?;
            let outcome = syncer(&session, cli.strict)
                .sync_path(local, remote, SyncTarget::Current)
                .await?;
            report(remote, &outcome);
        }
        Commands::Sync {
            local,
            remote,
            version: Some(n),
        } => {
            let session = connect(&cli, &cfg, true).await?;
            let outcome = syncer(&session, cli.strict)
                .sync_path(local, remote, SyncTarget::Version(*n))
                .await?;
            report(remote, &outcome);
        }
        Commands::Syncdir { local, remote } => {
            let session = connect(&cli, &cfg, true).await?;
            let keys = session.keys.as_ref().unwrap();
            let remote_files = session.api.get_all_files().await?;
            let s = syncer(&session, cli.strict);

            let result = walker::sync_directory(&s, keys, remote_files, local, remote).await;
            println!("{} chunks transferred", result.chunks_transferred);
            if let Some(err) = result.aborted {
                return Err(err).context("directory sync aborted");
            }
        }
        Commands::Rmfile { remote } => {
            let session = connect(&cli, &cfg, true).await?;
            let info = lookup(&session, remote).await?;
            session.api.remove_file(info.file_info.file_id).await?;
            println!("removed {}", remote);
        }
        Commands::Rmfileversions {
            remote,
            min_version,
            max_version,
        } => {
            let session = connect(&cli, &cfg, true).await?;
            let info = lookup(&session, remote).await?;
            session
                .api
                .remove_file_versions(info.file_info.file_id, *min_version, *max_version)
                .await?;
            println!(
                "removed versions {}..={} of {}",
                min_version, max_version, remote
            );
        }
        Commands::Getversions { remote } => {
            let session = connect(&cli, &cfg, true).await?;
            let info = lookup(&session, remote).await?;
            for v in session
                .api
                .get_file_versions(info.file_info.file_id)
                .await?
            {
                println!(
                    "v{:<4} chunks {:<6} mod {:<12} {}",
                    v.version_number, v.chunk_count, v.last_mod, v.file_hash
                );
            }
        }
    }

    Ok(())
}

fn syncer(session: &Session, strict: bool) -> Syncer<'_> {
    Syncer::new(
        &session.api,
        session.keys.as_ref().expect("session has keys"),
        session.chunk_size,
        strict,
    )
}

fn report(remote: &str, outcome: &sync::SyncOutcome) {
    let status = match outcome.status {
        SyncStatus::Same => "same",
        SyncStatus::LocalNewer => "local newer",
        SyncStatus::RemoteNewer => "remote newer",
        SyncStatus::Missing => "filled missing chunks",
    };
    println!(
        "{}: {} ({} chunks transferred)",
        remote, status, outcome.chunks_transferred
    );
}

async fn lookup(session: &Session, remote: &str) -> anyhow::Result<api::FileInfoResponse> {
    let keys = session.keys.as_ref().unwrap();
    let sealed = keys.seal_filename(remote)?;
    session
        .api
        .get_file_by_name(&sealed)
        .await?
        .with_context(|| format!("no remote file named {}", remote))
}

/// Log in and, when the command needs them, unlock the data keys.
///
/// The first ever login stores a fresh passphrase verifier on the server;
/// later logins re-derive the same keys from it and reject a wrong
/// passphrase locally.
async fn connect(cli: &Cli, cfg: &Config, need_keys: bool) -> anyhow::Result<Session> {
    let server = cli
        .server
        .clone()
        .or_else(|| cfg.server_url.clone())
        .context("no server configured; pass --server or run `freezer configure`")?;
    let user = cli
        .user
        .clone()
        .or_else(|| cfg.user.clone())
        .context("no user configured; pass --user or run `freezer configure`")?;

    let password = match &cli.password {
        Some(p) => p.clone(),
        None => rpassword::prompt_password("password: ")?,
    };

    let mut api = ApiClient::new(&server);
    let login = api.login(&user, &password).await?;
    let chunk_size = login.capabilities.chunk_size;

    let keys = if need_keys {
        let passphrase = match &cli.passphrase {
            Some(p) => p.clone(),
            None => rpassword::prompt_password("passphrase: ")?,
        };

        let stored = BASE64
            .decode(login.crypto_hash.as_bytes())
            .context("server returned malformed crypto hash")?;

        if stored.is_empty() {
            let (keys, crypto_hash) = KeySet::derive(&passphrase)?;
            api.set_crypto_hash(&BASE64.encode(crypto_hash)).await?;
            Some(keys)
        } else {
            Some(KeySet::rederive(&passphrase, &stored)?)
        }
    } else {
        None
    };

    Ok(Session {
        api,
        keys,
        chunk_size,
    })
}
