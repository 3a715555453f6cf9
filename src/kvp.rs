//! Key-value stores built on the SQLite utility.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info};

use crate::error::{Result, SqliteError};
use crate::sqlite::SqliteUtil;
use crate::types::{DataType, FieldDef, Record, WhereClause};

pub const DEFAULT_TABLE: &str = "KVP";

const KEY_FIELD: &str = "KEY_ID";
const GROUP_FIELD: &str = "GROUP_C";
const VALUE_FIELD: &str = "VALUE_X";
const DEBUG_FIELD: &str = "DEBUG_X";
const CREATED_FIELD: &str = "CREATED_DT";

const FORBIDDEN_GROUP_CHARS: &[char] = &['/', '\\', ':', '*', '?', '&', '"', '<', '>', '|'];

/// Group-scoped string key-value storage.
pub trait KeyValueStore {
    /// Adds `key` unless it is already present. Returns whether it was added.
    fn add(&mut self, key: &str, value: &str, debug: Option<&str>) -> Result<bool>;

    fn contains_key(&self, key: &str) -> bool;

    fn value(&self, key: &str) -> Option<&str>;

    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Key-value pairs persisted in one table of a SQLite file.
///
/// Several groups share a table; each store only sees its own group. The
/// group's entries are loaded once when the store is opened.
#[derive(Debug)]
pub struct SqliteKvp {
    util: Arc<SqliteUtil>,
    table: String,
    group: String,
    entries: HashMap<String, String>,
}

impl SqliteKvp {
    pub fn open(util: Arc<SqliteUtil>, group: &str) -> Result<Self> {
        Self::open_table(util, group, DEFAULT_TABLE)
    }

    pub fn open_table(util: Arc<SqliteUtil>, group: &str, table: &str) -> Result<Self> {
        let group = validate_group(group)?;
        let table = if table.trim().is_empty() {
            info!("kvp table name is empty, defaulting to {DEFAULT_TABLE}");
            DEFAULT_TABLE.to_string()
        } else {
            table.to_uppercase()
        };

        for (field, data_type) in [
            (KEY_FIELD, DataType::Text),
            (GROUP_FIELD, DataType::Text),
            (VALUE_FIELD, DataType::Text),
            (DEBUG_FIELD, DataType::Text),
            (CREATED_FIELD, DataType::DateTime),
        ] {
            util.register_field(FieldDef::new(table.as_str(), field, data_type))?;
        }

        let mut store = Self {
            util,
            table,
            group,
            entries: HashMap::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-reads this group's entries from the database.
    pub fn reload(&mut self) -> Result<()> {
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} = '{}'",
            KEY_FIELD,
            VALUE_FIELD,
            self.table,
            GROUP_FIELD,
            self.group.replace('\'', "''")
        );
        self.entries.clear();
        for record in self.util.select_records(&sql)? {
            if let (Some(key), Some(value)) =
                (record.field_val(KEY_FIELD), record.field_val(VALUE_FIELD))
            {
                self.entries.entry(key).or_insert(value);
            }
        }
        debug!(group = %self.group, entries = self.entries.len(), "loaded kvp group");
        Ok(())
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The database file backing this store.
    pub fn file(&self) -> PathBuf {
        self.util.file()
    }

    fn key_clauses(&self, key: &str) -> [WhereClause; 2] {
        [
            WhereClause::eq(KEY_FIELD, key),
            WhereClause::eq(GROUP_FIELD, self.group.as_str()),
        ]
    }
}

impl KeyValueStore for SqliteKvp {
    fn add(&mut self, key: &str, value: &str, debug: Option<&str>) -> Result<bool> {
        if key.is_empty() {
            return Err(SqliteError::InvalidArgument("key cannot be empty".to_string()));
        }
        if value.is_empty() {
            return Err(SqliteError::InvalidArgument("value cannot be empty".to_string()));
        }
        if self.contains_key(key) {
            return Ok(false);
        }

        let mut record = Record::new()
            .with_field(KEY_FIELD, key)
            .with_field(GROUP_FIELD, self.group.as_str())
            .with_field(VALUE_FIELD, value)
            .with_field(DEBUG_FIELD, debug.unwrap_or_default());
        record.add_typed_field(
            CREATED_FIELD,
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            DataType::DateTime,
        )?;

        let inserted = self
            .util
            .insert_record_if_absent(&self.table, &self.key_clauses(key), &record)?;
        if inserted {
            self.entries.insert(key.to_string(), value.to_string());
        } else {
            // Another writer got there first.
            self.reload()?;
        }
        Ok(inserted)
    }

    fn contains_key(&self, key: &str) -> bool {
        !key.is_empty() && self.entries.contains_key(key)
    }

    fn value(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.util.delete_records(&self.table, &self.key_clauses(key))?;
        self.entries.remove(key);
        Ok(())
    }
}

fn validate_group(group: &str) -> Result<String> {
    if group.trim().is_empty() {
        return Err(SqliteError::InvalidArgument(
            "group cannot be empty".to_string(),
        ));
    }
    if group.contains(FORBIDDEN_GROUP_CHARS) {
        return Err(SqliteError::InvalidArgument(format!(
            "group cannot contain special characters: {group}"
        )));
    }
    Ok(group.to_uppercase())
}
