//! Record descriptors - compile-time field tables for persisted records
//!
//! Every type the generic table handler persists implements [`Record`]: a
//! static table of mapped fields (column name, semantic kind, accessor,
//! mutator) plus an optional open attribute bag that absorbs any result
//! column no mapped field covers.

use std::collections::BTreeMap;

use rusqlite::types::ValueRef;
use uuid::Uuid;

use crate::{Error, Result};

/// Semantic kind of a mapped field's column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Stored as 0/1, read back from any integer representation
    Bool,
    /// 32-bit signed integer
    Int32,
    /// 32-bit unsigned integer
    UInt32,
    /// Opaque 128-bit identifier
    Id,
    /// Plain text
    Text,
}

/// A typed value passing between a record field and its row column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Id(Uuid),
    Text(String),
}

impl FieldValue {
    /// String form bound as the SQL parameter when storing.
    ///
    /// Everything is stringified; column type affinity restores the
    /// numeric form on the engine side.
    pub fn to_bind_string(&self) -> String {
        match self {
            FieldValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            FieldValue::Int32(v) => v.to_string(),
            FieldValue::UInt32(v) => v.to_string(),
            FieldValue::Id(id) => id.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

/// Descriptor for one mapped field of a record type.
///
/// The accessor returns `None` when the field currently holds no value;
/// storing such a record is a hard error, never a silent NULL.
#[derive(Debug)]
pub struct FieldSpec<T> {
    /// Column name, a trusted compile-time constant
    pub name: &'static str,
    /// Semantic kind driving row-value coercion
    pub kind: FieldKind,
    /// Reads the field off a record
    pub get: fn(&T) -> Option<FieldValue>,
    /// Writes a coerced row value back onto a record
    pub set: fn(&mut T, FieldValue),
}

/// A plain data record the generic table handler can map to rows.
///
/// Implementations declare their mapped fields as a static descriptor
/// table; the optional attribute bag picks up every result column the
/// descriptors do not cover.
pub trait Record: Default + 'static {
    /// Mapped fields in declaration order
    fn fields() -> &'static [FieldSpec<Self>]
    where
        Self: Sized;

    /// Open attribute bag, if this record type declares one
    fn attributes(&self) -> Option<&BTreeMap<String, String>> {
        None
    }

    /// Mutable access to the open attribute bag
    fn attributes_mut(&mut self) -> Option<&mut BTreeMap<String, String>> {
        None
    }
}

/// Coerce a raw row value into the typed form `kind` expects.
///
/// `None` means the column was NULL; the caller leaves the field at its
/// default instead of overwriting it.
pub(crate) fn coerce(kind: FieldKind, column: &str, value: ValueRef<'_>) -> Result<Option<FieldValue>> {
    if let ValueRef::Null = value {
        return Ok(None);
    }
    let coerced = match kind {
        FieldKind::Bool => FieldValue::Bool(integer_of(column, value, "bool")? != 0),
        FieldKind::Int32 => {
            let wide = integer_of(column, value, "int32")?;
            let narrow = i32::try_from(wide).map_err(|_| out_of_range(column, "int32", wide))?;
            FieldValue::Int32(narrow)
        }
        FieldKind::UInt32 => {
            let wide = integer_of(column, value, "uint32")?;
            let narrow = u32::try_from(wide).map_err(|_| out_of_range(column, "uint32", wide))?;
            FieldValue::UInt32(narrow)
        }
        FieldKind::Id => FieldValue::Id(id_of(column, value)?),
        FieldKind::Text => FieldValue::Text(display_string(value)),
    };
    Ok(Some(coerced))
}

/// Row value as display text for the attribute bag; NULL reads as empty
pub(crate) fn display_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Real(v) => v.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn integer_of(column: &str, value: ValueRef<'_>, expected: &'static str) -> Result<i64> {
    match value {
        ValueRef::Integer(v) => Ok(v),
        ValueRef::Real(v) => Ok(v as i64),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            text.trim().parse::<i64>().map_err(|_| Error::Coerce {
                column: column.to_string(),
                expected,
                value: text.into_owned(),
            })
        }
        other => Err(Error::Coerce {
            column: column.to_string(),
            expected,
            value: format!("{other:?}"),
        }),
    }
}

fn id_of(column: &str, value: ValueRef<'_>) -> Result<Uuid> {
    match value {
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            Uuid::parse_str(text.trim()).map_err(|_| Error::Coerce {
                column: column.to_string(),
                expected: "identifier",
                value: text.into_owned(),
            })
        }
        // 16-byte blob is the engine's native binary form
        ValueRef::Blob(bytes) => Uuid::from_slice(bytes).map_err(|_| Error::Coerce {
            column: column.to_string(),
            expected: "identifier",
            value: format!("{}-byte blob", bytes.len()),
        }),
        other => Err(Error::Coerce {
            column: column.to_string(),
            expected: "identifier",
            value: format!("{other:?}"),
        }),
    }
}

fn out_of_range(column: &str, expected: &'static str, value: i64) -> Error {
    Error::Coerce {
        column: column.to_string(),
        expected,
        value: value.to_string(),
    }
}
