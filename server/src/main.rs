//! FileFreezer server daemon (freezerd).

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod db;

use config::{ServerConfig, DEFAULT_CHUNK_SIZE};

#[derive(Parser)]
#[command(name = "freezerd")]
#[command(about = "FileFreezer sync server", long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(long, default_value = "freezer.db", env = "FREEZER_DB")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
        /// Maximum plaintext chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: i64,
        /// Token signing secret; a random one is generated when absent
        /// (tokens then do not survive a restart)
        #[arg(long, env = "FREEZER_JWT_SECRET")]
        secret: Option<String>,
    },
    /// Create a new user
    Adduser {
        name: String,
        /// Login password; prompted for when not given
        #[arg(long)]
        password: Option<String>,
        /// Storage quota in bytes
        #[arg(long, default_value_t = 1_000_000_000)]
        quota: i64,
    },
    /// Remove a user and everything they own
    Rmuser { name: String },
    /// Update a user's name, password or quota
    Moduser {
        name: String,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        quota: Option<i64>,
    },
    /// Show a user's quota, allocation and revision
    Userstats { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let pool = db::create_pool(&cli.db).await?;
    db::run_migrations(&pool).await?;

    match cli.command {
        Commands::Serve {
            listen,
            chunk_size,
            secret,
        } => {
            let config = ServerConfig::new(cli.db.clone(), listen, chunk_size, secret)?;
            let state = api::AppState::new(pool, config);
            api::rest::serve(state).await?;
        }
        Commands::Adduser {
            name,
            password,
            quota,
        } => {
            let password = read_password(password)?;
            let salt = auth::generate_salt();
            let salted_hash = auth::hash_login_password(&password, &salt)?;
            let user = db::users::add_user(&pool, &name, &salt, &salted_hash, quota).await?;
            println!("added user {} (id {})", user.name, user.user_id);
        }
        Commands::Rmuser { name } => {
            db::users::remove_user(&pool, &name).await?;
            println!("removed user {}", name);
        }
        Commands::Moduser {
            name,
            new_name,
            password,
            quota,
        } => {
            let user = db::users::get_user(&pool, &name).await?;
            let stats = db::users::get_user_stats(&pool, user.user_id).await?;

            let (salt, salted_hash) = match password {
                Some(p) => {
                    let salt = auth::generate_salt();
                    let hash = auth::hash_login_password(&p, &salt)?;
                    (salt, hash)
                }
                None => (user.salt.clone(), user.salted_hash.clone()),
            };

            db::users::update_user(
                &pool,
                user.user_id,
                new_name.as_deref().unwrap_or(&name),
                &salt,
                &salted_hash,
                &user.crypto_hash,
                quota.unwrap_or(stats.quota),
            )
            .await?;
            println!("updated user {}", name);
        }
        Commands::Userstats { name } => {
            let user = db::users::get_user(&pool, &name).await?;
            let stats = db::users::get_user_stats(&pool, user.user_id).await?;
            println!("user:      {} (id {})", user.name, user.user_id);
            println!("quota:     {} bytes", stats.quota);
            println!("allocated: {} bytes", stats.allocated);
            println!("revision:  {}", stats.revision);
        }
    }

    Ok(())
}

fn read_password(flag: Option<String>) -> anyhow::Result<String> {
    match flag {
        Some(p) => Ok(p),
        None => Ok(rpassword::prompt_password("password: ")?),
    }
}
