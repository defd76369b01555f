//! Check-in CLI - operator commands
//!
//! Usage:
//!   checkin migrate
//!   checkin sweep-revocations
//!   checkin hash-password <password>
//!   checkin create-admin --email <email> --name <name>

use anyhow::{bail, Context};
use checkin_api::auth::password::{hash_password, validate_password_strength};
use checkin_api::auth::PgRevocationStore;
use checkin_core::config::AppConfig;
use checkin_core::{normalize_email, NewPrincipal, PgStore, PrincipalRepository, Role};
use clap::{Parser, Subcommand};

/// Environment variable read by `create-admin` when `--password` is omitted
const ADMIN_PASSWORD_VAR: &str = "CHECKIN_ADMIN_PASSWORD";

#[derive(Parser)]
#[command(name = "checkin")]
#[command(about = "Check-in platform operator CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the database schema
    Migrate,
    /// Delete expired rows from the revocation table
    SweepRevocations,
    /// Print the Argon2 hash of a password
    HashPassword {
        password: String,
    },
    /// Create an admin principal
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Falls back to CHECKIN_ADMIN_PASSWORD
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            let store = connect().await?;
            store.migrate().await?;
            println!("Schema applied");
        }
        Commands::SweepRevocations => {
            let store = connect().await?;
            let revocations = PgRevocationStore::new(store.pool().clone(), store_timeout()?);
            let removed = revocations.sweep_expired().await?;
            println!("Removed {removed} expired revocation entries");
        }
        Commands::HashPassword { password } => {
            validate_password_strength(&password)?;
            println!("{}", hash_password(&password)?);
        }
        Commands::CreateAdmin {
            email,
            name,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => std::env::var(ADMIN_PASSWORD_VAR)
                    .with_context(|| format!("--password or {ADMIN_PASSWORD_VAR} is required"))?,
            };
            validate_password_strength(&password)?;

            let name = name.trim().to_string();
            if name.is_empty() {
                bail!("name is required");
            }

            let store = connect().await?;
            let principal = store
                .create(NewPrincipal {
                    email: normalize_email(&email),
                    password_hash: hash_password(&password)?,
                    name,
                    role: Role::Admin,
                })
                .await?;
            tracing::info!(user_id = %principal.id, "Admin principal created");
            println!("Created admin {} ({})", principal.email, principal.id);
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgStore> {
    let config = AppConfig::from_env()?;
    let url = config
        .database
        .postgres_url
        .as_deref()
        .context("DATABASE_URL is required")?;

    let store = PgStore::connect(
        url,
        config.database.pool_size,
        config.database.store_timeout(),
    )
    .await?;
    Ok(store)
}

fn store_timeout() -> anyhow::Result<std::time::Duration> {
    Ok(AppConfig::from_env()?.database.store_timeout())
}
