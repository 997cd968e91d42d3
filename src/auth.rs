//! Authentication store - credentials and login tokens
//!
//! Credentials are an open bag of columns keyed by principal identifier.
//! Store distinguishes update from insert instead of using REPLACE, so
//! existing columns a partial write does not mention keep their values.
//! Tokens live in a sibling table with check-and-renew validity handling
//! and an amortized sweep of expired rows.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params, params_from_iter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::record;
use crate::schema::{AUTH_STORE, Migrator};
use crate::Result;

/// Default realm for credentials
pub const DEFAULT_REALM: &str = "auth";

/// Identifier column of the credentials realm; addressing, never payload
const ID_COLUMN: &str = "UUID";

/// Table holding login tokens
pub const TOKENS_REALM: &str = "tokens";

/// Expired token rows are swept at most this often
const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A principal's stored credentials: identifier plus an open column bag
/// (password hash, salt, and whatever else the realm's schema carries).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub principal_id: Uuid,
    pub data: BTreeMap<String, String>,
}

impl Credential {
    pub fn new(principal_id: Uuid) -> Self {
        Self {
            principal_id,
            data: BTreeMap::new(),
        }
    }

    /// Builder-style attribute insert
    pub fn with_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Credential and token persistence for one realm
pub struct AuthStore {
    db: Arc<Database>,
    realm: String,
    column_names: OnceLock<Vec<String>>,
    last_sweep: Mutex<Option<Instant>>,
    sweep_interval: Duration,
}

impl AuthStore {
    /// Create a store on `realm` without touching the schema
    pub fn new(db: Arc<Database>, realm: impl Into<String>) -> Self {
        Self {
            db,
            realm: realm.into(),
            column_names: OnceLock::new(),
            last_sweep: Mutex::new(None),
            sweep_interval: TOKEN_SWEEP_INTERVAL,
        }
    }

    /// Create a store, bringing the auth schema to its latest revision first
    pub fn with_migration(
        db: Arc<Database>,
        realm: impl Into<String>,
        migrator: &dyn Migrator,
    ) -> Result<Self> {
        let store = Self::new(db, realm);
        let mut conn = store.db.connect()?;
        migrator.bring_to_latest(&mut conn, AUTH_STORE)?;
        Ok(store)
    }

    /// Override the token sweep interval (tests shorten it)
    pub fn with_token_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    // ========== Credentials ==========

    /// Fetch a principal's credentials, or `None` when unknown
    pub fn get(&self, principal_id: Uuid) -> Result<Option<Credential>> {
        let sql = format!("SELECT * FROM {} WHERE \"UUID\" = ?1", self.realm);
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let current: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([principal_id.to_string()])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        // Latched on the first query that found a row
        let cached = self.column_names.get_or_init(|| current.clone());

        let mut credential = Credential::new(principal_id);
        for name in cached {
            if name == ID_COLUMN {
                continue;
            }
            let Some(idx) = current.iter().position(|c| c == name) else {
                continue;
            };
            credential
                .data
                .insert(name.clone(), record::display_string(row.get_ref(idx)?));
        }
        Ok(Some(credential))
    }

    /// Update a principal's columns; insert the row if none existed.
    ///
    /// Columns the bag does not mention keep their current values. A
    /// `UUID` key in the bag is addressing, not payload, and is dropped.
    /// An empty bag writes nothing and reports `false`.
    pub fn store(&self, credential: &Credential) -> Result<bool> {
        let fields: Vec<(&str, &str)> = credential
            .data
            .iter()
            .filter(|(key, _)| key.as_str() != ID_COLUMN)
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        if fields.is_empty() {
            return Ok(false);
        }

        let principal = credential.principal_id.to_string();
        let mut bound: Vec<&str> = fields.iter().map(|(_, value)| *value).collect();
        bound.push(principal.as_str());

        let assignments: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("\"{}\" = ?{}", name, i + 1))
            .collect();
        let update_sql = format!(
            "UPDATE {} SET {} WHERE \"UUID\" = ?{}",
            self.realm,
            assignments.join(", "),
            fields.len() + 1
        );

        // One writer transaction covers the update and the fallback
        // insert, so a concurrent insert cannot slip between them.
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = tx.execute(&update_sql, params_from_iter(bound.iter()))?;
        let stored = if updated == 0 {
            let names: Vec<String> = fields.iter().map(|(name, _)| format!("\"{name}\"")).collect();
            let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{i}")).collect();
            let insert_sql = format!(
                "INSERT INTO {} (\"UUID\", {}) VALUES (?{}, {})",
                self.realm,
                names.join(", "),
                fields.len() + 1,
                placeholders.join(", ")
            );
            tx.execute(&insert_sql, params_from_iter(bound.iter()))? > 0
        } else {
            true
        };
        tx.commit()?;
        Ok(stored)
    }

    /// Patch one column by name.
    ///
    /// `item` is interpolated as an identifier; it must be a trusted,
    /// schema-known column name.
    pub fn set_data_item(&self, principal_id: Uuid, item: &str, value: &str) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET \"{}\" = ?1 WHERE \"UUID\" = ?2",
            self.realm, item
        );
        let conn = self.db.connect()?;
        let affected = conn.execute(&sql, params![value, principal_id.to_string()])?;
        Ok(affected > 0)
    }

    // ========== Tokens ==========

    /// Issue `token` for a principal, valid for `lifetime_min` minutes
    pub fn set_token(&self, principal_id: Uuid, token: &str, lifetime_min: i64) -> Result<bool> {
        let conn = self.db.connect()?;
        self.sweep_expired_tokens(&conn)?;

        let validity = Utc::now().timestamp() + lifetime_min * 60;
        let sql = format!("INSERT INTO {TOKENS_REALM} (\"UUID\", token, validity) VALUES (?1, ?2, ?3)");
        let affected = conn.execute(&sql, params![principal_id.to_string(), token, validity])?;
        Ok(affected > 0)
    }

    /// Check a token and renew it for another `lifetime_min` minutes.
    ///
    /// A single conditional UPDATE, so the validity check and the renewal
    /// cannot interleave with another caller. Expired or unknown tokens
    /// report `false`.
    pub fn check_token(&self, principal_id: Uuid, token: &str, lifetime_min: i64) -> Result<bool> {
        let conn = self.db.connect()?;
        self.sweep_expired_tokens(&conn)?;

        let now = Utc::now().timestamp();
        let sql = format!(
            "UPDATE {TOKENS_REALM} SET validity = ?1 WHERE \"UUID\" = ?2 AND token = ?3 AND validity > ?4"
        );
        let affected = conn.execute(
            &sql,
            params![now + lifetime_min * 60, principal_id.to_string(), token, now],
        )?;
        Ok(affected > 0)
    }

    /// Delete expired token rows, at most once per sweep interval.
    ///
    /// A fresh store treats the sweep as due, so its first token
    /// operation cleans up whatever earlier runs left behind.
    fn sweep_expired_tokens(&self, conn: &Connection) -> Result<()> {
        let mut last = self
            .last_sweep
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.is_some_and(|at| at.elapsed() < self.sweep_interval) {
            return Ok(());
        }

        let sql = format!("DELETE FROM {TOKENS_REALM} WHERE validity < ?1");
        let removed = conn.execute(&sql, [Utc::now().timestamp()])?;
        if removed > 0 {
            tracing::debug!("Swept {} expired token(s)", removed);
        }
        *last = Some(Instant::now());
        Ok(())
    }
}
