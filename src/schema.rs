//! Store schemas and the migration boundary
//!
//! Handlers consume migration as one opaque call: bring this store's
//! schema to its latest revision. The built-in [`Migrations`] covers the
//! stock stores with revisioned scripts, tracked per store in a
//! `migrations` table so re-runs are cheap no-ops.

use rusqlite::{Connection, OptionalExtension, params};

use crate::{Error, Result};

/// Store identifier the authentication store migrates under
pub const AUTH_STORE: &str = "AuthStore";

/// Store identifier the friends store migrates under
pub const FRIENDS_STORE: &str = "FriendsStore";

/// Brings a store's schema to its latest revision.
///
/// Implementations must be idempotent: every handler runs this once at
/// construction, and several handlers may share one database.
pub trait Migrator {
    fn bring_to_latest(&self, conn: &mut Connection, store: &str) -> Result<()>;
}

/// Revisioned schema scripts for one store
struct StoreSchema {
    store: &'static str,
    revisions: &'static [(i64, &'static str)],
}

const AUTH_REVISIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS auth (
    UUID TEXT PRIMARY KEY,
    passwordHash TEXT NOT NULL DEFAULT '',
    passwordSalt TEXT NOT NULL DEFAULT '',
    webLoginKey TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS tokens (
    UUID TEXT NOT NULL,
    token TEXT NOT NULL,
    validity INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tokens_principal ON tokens(UUID, token);
CREATE INDEX IF NOT EXISTS idx_tokens_validity ON tokens(validity);
"#,
    ),
    (
        2,
        r#"
ALTER TABLE auth ADD COLUMN accountType TEXT NOT NULL DEFAULT 'UserAccount';
"#,
    ),
];

const FRIENDS_REVISIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS friends (
    PrincipalID TEXT NOT NULL,
    Friend TEXT NOT NULL,
    Flags INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (PrincipalID, Friend)
);
CREATE INDEX IF NOT EXISTS idx_friends_friend ON friends(Friend);
"#,
    ),
    (
        2,
        r#"
ALTER TABLE friends ADD COLUMN Offered INTEGER NOT NULL DEFAULT 0;
"#,
    ),
];

const SCHEMAS: &[StoreSchema] = &[
    StoreSchema {
        store: AUTH_STORE,
        revisions: AUTH_REVISIONS,
    },
    StoreSchema {
        store: FRIENDS_STORE,
        revisions: FRIENDS_REVISIONS,
    },
];

/// Bookkeeping table recording each store's applied revision
const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    store TEXT PRIMARY KEY,
    revision INTEGER NOT NULL
)
"#;

/// Built-in migrator for the stock stores
#[derive(Debug, Default, Clone, Copy)]
pub struct Migrations;

impl Migrations {
    fn current_revision(conn: &Connection, store: &str) -> Result<i64> {
        conn.execute(CREATE_MIGRATIONS_TABLE, [])?;
        let revision = conn
            .query_row(
                "SELECT revision FROM migrations WHERE store = ?1",
                [store],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revision.unwrap_or(0))
    }
}

impl Migrator for Migrations {
    fn bring_to_latest(&self, conn: &mut Connection, store: &str) -> Result<()> {
        let schema = SCHEMAS
            .iter()
            .find(|s| s.store == store)
            .ok_or_else(|| Error::UnknownStore(store.to_string()))?;

        let mut current = Self::current_revision(conn, store)?;
        for (revision, script) in schema.revisions {
            if *revision <= current {
                continue;
            }
            // A revision's script and its bookkeeping row commit together
            let tx = conn.transaction()?;
            tx.execute_batch(script)?;
            tx.execute(
                "REPLACE INTO migrations (store, revision) VALUES (?1, ?2)",
                params![store, revision],
            )?;
            tx.commit()?;
            current = *revision;
            tracing::debug!("Migrated {} to schema revision {}", store, revision);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn migration_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect().unwrap();

        Migrations.bring_to_latest(&mut conn, FRIENDS_STORE).unwrap();
        Migrations.bring_to_latest(&mut conn, FRIENDS_STORE).unwrap();

        let revision: i64 = conn
            .query_row(
                "SELECT revision FROM migrations WHERE store = ?1",
                [FRIENDS_STORE],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(revision, 2);
    }

    #[test]
    fn unknown_store_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect().unwrap();

        let result = Migrations.bring_to_latest(&mut conn, "NoSuchStore");
        assert!(matches!(result, Err(Error::UnknownStore(_))));
    }

    #[test]
    fn auth_migration_creates_both_tables() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect().unwrap();

        Migrations.bring_to_latest(&mut conn, AUTH_STORE).unwrap();

        conn.execute(
            "INSERT INTO auth (UUID, passwordHash) VALUES ('u', 'h')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tokens (UUID, token, validity) VALUES ('u', 't', 0)",
            [],
        )
        .unwrap();

        // Revision 2 added the account type column with its default
        let account: String = conn
            .query_row("SELECT accountType FROM auth WHERE UUID = 'u'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(account, "UserAccount");
    }

    #[test]
    fn friends_migration_adds_offered_column() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect().unwrap();

        Migrations.bring_to_latest(&mut conn, FRIENDS_STORE).unwrap();

        conn.execute(
            "INSERT INTO friends (PrincipalID, Friend) VALUES ('a', 'b')",
            [],
        )
        .unwrap();
        let offered: i64 = conn
            .query_row("SELECT Offered FROM friends", [], |row| row.get(0))
            .unwrap();
        assert_eq!(offered, 0);
    }

    #[test]
    fn stores_migrate_independently_on_one_database() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect().unwrap();

        Migrations.bring_to_latest(&mut conn, AUTH_STORE).unwrap();
        Migrations.bring_to_latest(&mut conn, FRIENDS_STORE).unwrap();

        let stores: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stores, 2);
    }

    #[test]
    fn failed_revision_rolls_back_its_schema_changes() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect().unwrap();

        // A bookkeeping table that refuses revision 2 makes that
        // revision's recording write fail after its DDL already ran
        conn.execute_batch(
            "CREATE TABLE migrations (
                store TEXT PRIMARY KEY,
                revision INTEGER NOT NULL CHECK (revision < 2)
            )",
        )
        .unwrap();

        assert!(Migrations.bring_to_latest(&mut conn, FRIENDS_STORE).is_err());

        // Revision 1 stayed committed
        let revision: i64 = conn
            .query_row(
                "SELECT revision FROM migrations WHERE store = ?1",
                [FRIENDS_STORE],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(revision, 1);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM friends", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);

        // Revision 2 rolled back whole, its Offered column included
        let offered = conn.query_row("SELECT COUNT(Offered) FROM friends", [], |row| {
            row.get::<_, i64>(0)
        });
        assert!(offered.is_err());
    }
}
