//! Gridstore CLI - admin commands for grid store databases

use clap::{Parser, Subcommand};
use gridstore::config::{self, GridstoreConfig};
use gridstore::schema::{AUTH_STORE, FRIENDS_STORE};
use gridstore::{AuthStore, Database, FriendsStore, Migrations, Migrator};
use gridstore::{auth, friends};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gridstore")]
#[command(version = "0.1.0")]
#[command(about = "Record-to-row persistence for grid services - credentials, tokens, friend links")]
#[command(long_about = r#"
Gridstore keeps grid service state in relational stores:
  • Credentials and login tokens per principal
  • Directed friend links with reciprocal flags
  • Generic record tables driven by field descriptors

Example usage:
  gridstore init
  gridstore stats
  gridstore friends --principal 11111111-2222-3333-4444-555555555555
  gridstore set-token --principal <id> --token <secret> --lifetime 30
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a gridstore.toml and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Bring every stock store's schema to its latest revision
    Migrate {
        /// Path to the database file (defaults to gridstore.toml's)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Show row counts per store
    Stats {
        /// Path to the database file (defaults to gridstore.toml's)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// List a principal's friends with reciprocal flags
    Friends {
        /// Principal identifier (prefix match)
        #[arg(short, long)]
        principal: String,

        /// Path to the database file (defaults to gridstore.toml's)
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Issue a login token for a principal
    SetToken {
        /// Principal identifier
        #[arg(short, long)]
        principal: Uuid,

        /// Token value
        #[arg(short, long)]
        token: String,

        /// Token lifetime in minutes
        #[arg(short, long, default_value = "60")]
        lifetime: i64,

        /// Path to the database file (defaults to gridstore.toml's)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Check a login token and renew its validity
    CheckToken {
        /// Principal identifier
        #[arg(short, long)]
        principal: Uuid,

        /// Token value
        #[arg(short, long)]
        token: String,

        /// Renewed lifetime in minutes
        #[arg(short, long, default_value = "60")]
        lifetime: i64,

        /// Path to the database file (defaults to gridstore.toml's)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let cfg = config::load_config(None)?.unwrap_or_default();
    let auth_realm = cfg
        .auth_realm
        .clone()
        .unwrap_or_else(|| auth::DEFAULT_REALM.to_string());
    let friends_realm = cfg
        .friends_realm
        .clone()
        .unwrap_or_else(|| friends::DEFAULT_REALM.to_string());

    match cli.command {
        Commands::Init { force } => {
            let db_path = config::default_database_path_in(Path::new("."));
            let new_cfg = GridstoreConfig {
                database: Some(db_path.display().to_string()),
                auth_realm: None,
                friends_realm: None,
            };
            config::write_config(&config::default_config_path(), &new_cfg, force)?;
            config::ensure_db_dir(&db_path)?;

            let db = Database::open(&db_path)?;
            let mut conn = db.connect()?;
            Migrations.bring_to_latest(&mut conn, AUTH_STORE)?;
            Migrations.bring_to_latest(&mut conn, FRIENDS_STORE)?;

            println!("✅ Initialized gridstore");
            println!("🗄️  Database: {}", db_path.display());
            println!("📝 Config: {}", config::default_config_path().display());
        }

        Commands::Migrate { database } => {
            let db_path = resolve_database(database, &cfg);
            config::ensure_db_dir(&db_path)?;
            let db = Database::open(&db_path)?;
            let mut conn = db.connect()?;
            Migrations.bring_to_latest(&mut conn, AUTH_STORE)?;
            Migrations.bring_to_latest(&mut conn, FRIENDS_STORE)?;
            println!("✅ Schemas at latest revision ({})", db_path.display());
        }

        Commands::Stats { database } => {
            let db_path = resolve_database(database, &cfg);
            let db = Database::open(&db_path)?;
            let conn = db.connect()?;

            println!("📊 Gridstore Statistics ({})", db_path.display());
            println!("------------------------------------");
            for table in [auth_realm.as_str(), auth::TOKENS_REALM, friends_realm.as_str()] {
                let rows: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })?;
                println!("   {}: {} rows", table, rows);
            }
        }

        Commands::Friends {
            principal,
            database,
            format,
        } => {
            let db_path = resolve_database(database, &cfg);
            let db = Arc::new(Database::open(&db_path)?);
            let store = FriendsStore::with_migration(db, friends_realm, &Migrations)?;
            let infos = store.get_friend_infos(&principal)?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else if infos.is_empty() {
                println!("∅ No friends found for {}", principal);
            } else {
                for info in infos {
                    let reach = if info.their_flags == friends::NOT_MUTUAL {
                        "one-sided"
                    } else {
                        "mutual"
                    };
                    println!(
                        "- {} (my flags: {}, their flags: {}, {})",
                        info.friend, info.my_flags, info.their_flags, reach
                    );
                }
            }
        }

        Commands::SetToken {
            principal,
            token,
            lifetime,
            database,
        } => {
            let db_path = resolve_database(database, &cfg);
            let db = Arc::new(Database::open(&db_path)?);
            let store = AuthStore::with_migration(db, auth_realm, &Migrations)?;

            if store.set_token(principal, &token, lifetime)? {
                println!("✅ Token issued for {} ({} min)", principal, lifetime);
            } else {
                println!("❌ Token could not be stored.");
            }
        }

        Commands::CheckToken {
            principal,
            token,
            lifetime,
            database,
        } => {
            let db_path = resolve_database(database, &cfg);
            let db = Arc::new(Database::open(&db_path)?);
            let store = AuthStore::with_migration(db, auth_realm, &Migrations)?;

            if store.check_token(principal, &token, lifetime)? {
                println!("✅ Token valid, renewed for {} min", lifetime);
            } else {
                println!("❌ Token invalid or expired.");
            }
        }
    }

    Ok(())
}

fn resolve_database(flag: Option<PathBuf>, cfg: &GridstoreConfig) -> PathBuf {
    flag.or_else(|| cfg.database.clone().map(PathBuf::from))
        .unwrap_or_else(|| config::default_database_path_in(Path::new(".")))
}
