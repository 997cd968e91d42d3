//! Generic table handler - shared persistence for any [`Record`] type
//!
//! One handler owns one realm (table) and drives every statement off the
//! record type's field descriptor table: predicated reads, REPLACE-based
//! upserts, deletes and counts are assembled dynamically. Identifiers come
//! from trusted compile-time descriptors; values always go through
//! parameter binding.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use rusqlite::{Row, params_from_iter};

use crate::db::Database;
use crate::record::{self, Record};
use crate::schema::Migrator;
use crate::{Error, Result};

/// Maps one record type onto one table.
///
/// Cheap to share: the handler holds no connection, only the database
/// handle and a lazily latched column cache.
pub struct TableHandler<T: Record> {
    db: Arc<Database>,
    realm: String,
    unmapped_columns: OnceLock<Vec<String>>,
    _record: PhantomData<T>,
}

impl<T: Record> TableHandler<T> {
    /// Create a handler for `realm` without touching the schema
    pub fn new(db: Arc<Database>, realm: impl Into<String>) -> Self {
        Self {
            db,
            realm: realm.into(),
            unmapped_columns: OnceLock::new(),
            _record: PhantomData,
        }
    }

    /// Create a handler, bringing `store`'s schema to its latest revision first
    pub fn with_migration(
        db: Arc<Database>,
        realm: impl Into<String>,
        migrator: &dyn Migrator,
        store: &str,
    ) -> Result<Self> {
        let handler = Self::new(db, realm);
        let mut conn = handler.db.connect()?;
        migrator.bring_to_latest(&mut conn, store)?;
        Ok(handler)
    }

    /// Table this handler reads and writes
    pub fn realm(&self) -> &str {
        &self.realm
    }

    // ========== Reads ==========

    /// Fetch every row matching `field = key`
    pub fn get_by(&self, field: &str, key: &str) -> Result<Vec<T>> {
        self.get(&[field], &[key])
    }

    /// Fetch every row matching all `fields[i] = keys[i]` predicates.
    ///
    /// Mismatched arities return an empty result, not an error.
    pub fn get(&self, fields: &[&str], keys: &[&str]) -> Result<Vec<T>> {
        if fields.len() != keys.len() {
            tracing::debug!(
                "Mismatched predicate arity on {}: {} fields, {} keys",
                self.realm,
                fields.len(),
                keys.len()
            );
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            self.realm,
            equality_terms(fields).join(" AND ")
        );
        self.query(&sql, params_from_iter(keys.iter()))
    }

    /// Fetch every row matching a raw WHERE clause.
    ///
    /// The clause is interpolated verbatim; it must come from trusted
    /// code, never from request input.
    pub fn get_where(&self, clause: &str) -> Result<Vec<T>> {
        let sql = format!("SELECT * FROM {} WHERE {}", self.realm, clause);
        self.query(&sql, [])
    }

    // ========== Writes ==========

    /// Upsert the full row for `record` (REPLACE semantics).
    ///
    /// Every mapped field must hold a value; a `None` accessor result
    /// aborts before any statement is issued. Attribute bag entries are
    /// written as their own columns. Returns whether a row was written.
    pub fn store(&self, record: &T) -> Result<bool> {
        let mut names: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        for spec in T::fields() {
            let value = (spec.get)(record).ok_or_else(|| Error::NullField {
                realm: self.realm.clone(),
                field: spec.name,
            })?;
            names.push(spec.name);
            values.push(value.to_bind_string());
        }
        if let Some(bag) = record.attributes() {
            for (key, value) in bag {
                names.push(key.as_str());
                values.push(value.clone());
            }
        }

        let quoted: Vec<String> = names.iter().map(|n| format!("\"{n}\"")).collect();
        let placeholders = vec!["?"; names.len()];
        let sql = format!(
            "REPLACE INTO {} ({}) VALUES ({})",
            self.realm,
            quoted.join(", "),
            placeholders.join(", ")
        );

        let conn = self.db.connect()?;
        let affected = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(affected > 0)
    }

    /// Delete every row matching `field = key`
    pub fn delete_by(&self, field: &str, key: &str) -> Result<bool> {
        self.delete(&[field], &[key])
    }

    /// Delete every row matching all predicates.
    ///
    /// Mismatched arities delete nothing and report `false`.
    pub fn delete(&self, fields: &[&str], keys: &[&str]) -> Result<bool> {
        if fields.len() != keys.len() {
            tracing::debug!(
                "Mismatched predicate arity on {}: {} fields, {} keys",
                self.realm,
                fields.len(),
                keys.len()
            );
            return Ok(false);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.realm,
            equality_terms(fields).join(" AND ")
        );
        let conn = self.db.connect()?;
        let affected = conn.execute(&sql, params_from_iter(keys.iter()))?;
        Ok(affected > 0)
    }

    // ========== Counts ==========

    /// Count rows matching `field = key`
    pub fn count_by(&self, field: &str, key: &str) -> Result<i64> {
        self.count(&[field], &[key])
    }

    /// Count rows matching all predicates; mismatched arities count zero
    pub fn count(&self, fields: &[&str], keys: &[&str]) -> Result<i64> {
        if fields.len() != keys.len() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.realm,
            equality_terms(fields).join(" AND ")
        );
        let conn = self.db.connect()?;
        let count = conn.query_row(&sql, params_from_iter(keys.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// Count rows matching a raw WHERE clause (trusted code only)
    pub fn count_where(&self, clause: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.realm, clause);
        let conn = self.db.connect()?;
        let count = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    // ========== Row mapping ==========

    /// Run `sql`, map each row to a record, and let `extend` see the raw
    /// row afterwards (for query-computed columns the descriptors and the
    /// column cache know nothing about).
    pub(crate) fn query_rows<P, F>(&self, sql: &str, params: P, mut extend: F) -> Result<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>, &[String], &mut T) -> Result<()>,
    {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let unmapped = self.unmapped_in(&columns);

        let mut records = Vec::new();
        let mut rows = stmt.query(params)?;
        while let Some(row) = rows.next()? {
            let mut record = read_row::<T>(row, &columns, unmapped)?;
            extend(row, &columns, &mut record)?;
            records.push(record);
        }
        Ok(records)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        self.query_rows(sql, params, |_, _, _| Ok(()))
    }

    /// Columns of this realm no field descriptor covers, latched from the
    /// first executed query's result schema. Later queries may carry
    /// extra computed columns or miss some; absent names are skipped at
    /// read time rather than re-learned.
    fn unmapped_in(&self, columns: &[String]) -> &[String] {
        if columns.is_empty() {
            return &[];
        }
        self.unmapped_columns.get_or_init(|| {
            columns
                .iter()
                .filter(|name| !T::fields().iter().any(|spec| spec.name == **name))
                .cloned()
                .collect()
        })
    }
}

/// One result row into one record: mapped fields first (NULL leaves the
/// default in place), then cached unmapped columns into the bag.
fn read_row<T: Record>(row: &Row<'_>, columns: &[String], unmapped: &[String]) -> Result<T> {
    let mut record = T::default();
    for spec in T::fields() {
        let Some(idx) = columns.iter().position(|c| c == spec.name) else {
            continue;
        };
        if let Some(value) = record::coerce(spec.kind, spec.name, row.get_ref(idx)?)? {
            (spec.set)(&mut record, value);
        }
    }
    if let Some(bag) = record.attributes_mut() {
        for name in unmapped {
            let Some(idx) = columns.iter().position(|c| c == name) else {
                continue;
            };
            bag.insert(name.clone(), record::display_string(row.get_ref(idx)?));
        }
    }
    Ok(record)
}

fn equality_terms(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| format!("\"{f}\" = ?")).collect()
}
