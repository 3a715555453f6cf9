use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SqliteError};
use crate::metadata::Metadata;
use crate::types::{DataType, FieldDef, FieldVal, Record, Value, WhereClause};

/// Prefix for WHERE bind names so they never collide with a SET bind on the same field.
const WHERE_BIND_PREFIX: &str = "WHERE_";

type Binds = Vec<(String, Value)>;

/// SQLite utility configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// Fields declared when the utility is built from this config
    #[serde(default)]
    pub schema: Vec<FieldDef>,
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            schema: Vec::new(),
        }
    }

    pub fn with_field(mut self, field_def: FieldDef) -> Self {
        self.schema.push(field_def);
        self
    }
}

/// Schema-evolving CRUD access to one SQLite file.
///
/// Every operation opens its own connection and closes it before returning.
/// There is no pooling and no transaction spanning two calls, so
/// `record_exists` followed by `insert_record` races against other writers;
/// use [`SqliteUtil::insert_record_if_absent`] when that matters.
///
/// Table and column names are interpolated into the SQL text as-is and must
/// come from trusted declarations. Values are always bound, except for the
/// raw SET expressions of [`SqliteUtil::update_records`] and the SQL text of
/// [`SqliteUtil::select_records`].
#[derive(Debug)]
pub struct SqliteUtil {
    metadata: RwLock<Metadata>,
}

impl SqliteUtil {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            metadata: RwLock::new(Metadata::new(file)),
        }
    }

    /// Builds the utility and registers every field declared in `config`.
    pub fn from_config(config: SqliteConfig) -> Result<Self> {
        let util = Self::new(config.db_path);
        for field_def in config.schema {
            util.register_field(field_def)?;
        }
        Ok(util)
    }

    /// The database file, as bound in the metadata registry.
    pub fn file(&self) -> PathBuf {
        self.read_metadata().file().to_path_buf()
    }

    /// A snapshot of the declared tables and fields.
    pub fn metadata(&self) -> Metadata {
        self.read_metadata().clone()
    }

    /// Declares a field, creating its table or adding its column when missing.
    ///
    /// Safe to call repeatedly for the same field. The introspection and the
    /// DDL run inside one immediate transaction, so concurrent registrations
    /// on the same file see each other's tables and columns.
    pub fn register_field(&self, field_def: FieldDef) -> Result<()> {
        let table = field_def.table();
        let field = field_def.field();
        let schema_error = |source| SqliteError::Schema {
            table: table.to_string(),
            field: field.to_string(),
            source,
        };

        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(schema_error)?;
        if !table_exists_on(&tx, table).map_err(schema_error)? {
            let sql = format!(
                "CREATE TABLE {} ({} {})",
                table,
                field,
                field_def.data_type().sql_type()
            );
            debug!(%sql, "executing statement");
            tx.execute(&sql, []).map_err(schema_error)?;
            info!(table, field, "created table");
        } else if !field_exists_on(&tx, table, field).map_err(schema_error)? {
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table,
                field,
                field_def.data_type().sql_type()
            );
            debug!(%sql, "executing statement");
            tx.execute(&sql, []).map_err(schema_error)?;
            info!(table, field, "added column");
        }
        tx.commit().map_err(schema_error)?;
        drop(conn);

        self.write_metadata().register_field(field_def);
        Ok(())
    }

    /// Declared type of `table.field`.
    pub fn field_data_type(&self, table: &str, field: &str) -> Result<DataType> {
        Ok(self.read_metadata().field_def(table, field)?.data_type())
    }

    /// A field value coerced by the declared type of `table.field`.
    pub fn typed_field_val(
        &self,
        table: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<FieldVal> {
        let data_type = self.field_data_type(table, field)?;
        FieldVal::typed(field, value, data_type)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.connect()?;
        Ok(table_exists_on(&conn, table)?)
    }

    pub fn field_exists(&self, table: &str, field: &str) -> Result<bool> {
        let conn = self.connect()?;
        Ok(field_exists_on(&conn, table, field)?)
    }

    /// Removes every row of `table`.
    pub fn truncate_table(&self, table: &str) -> Result<usize> {
        self.execute(&format!("DELETE FROM {table}"), &[])
    }

    pub fn insert_record(&self, table: &str, record: &Record) -> Result<()> {
        let (sql, binds) = render_insert(table, record)?;
        self.execute(&sql, &binds)?;
        Ok(())
    }

    /// Inserts `record` unless a row matches `where_clauses`, atomically.
    ///
    /// The check and the insert share one connection inside an immediate
    /// transaction. Returns `true` when the row was inserted.
    pub fn insert_record_if_absent(
        &self,
        table: &str,
        where_clauses: &[WhereClause],
        record: &Record,
    ) -> Result<bool> {
        let (insert_sql, insert_binds) = render_insert(table, record)?;
        let mut select_binds = Vec::new();
        let select_sql = format!(
            "SELECT * FROM {}{}",
            table,
            render_where(where_clauses, &mut select_binds)
        );

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        debug!(sql = %select_sql, binds = select_binds.len(), "executing statement");
        let exists = {
            let mut stmt = tx.prepare(&select_sql)?;
            stmt.exists(named_params(&select_binds).as_slice())?
        };
        if exists {
            return Ok(false);
        }
        debug!(sql = %insert_sql, binds = insert_binds.len(), "executing statement");
        tx.execute(&insert_sql, named_params(&insert_binds).as_slice())?;
        tx.commit()?;
        Ok(true)
    }

    /// Runs one `UPDATE` on `table`. Returns the number of rows changed.
    ///
    /// `unbound_sets` render verbatim as `FIELD = <value text>`, e.g. a value
    /// of `COUNT + 2`; the caller owns the safety of that text.
    /// `bound_sets` render as `FIELD = @FIELD` and are bound.
    pub fn update_records(
        &self,
        table: &str,
        unbound_sets: &[FieldVal],
        bound_sets: &[FieldVal],
        where_clauses: &[WhereClause],
    ) -> Result<usize> {
        let mut binds = Vec::new();
        let mut sets = Vec::with_capacity(unbound_sets.len() + bound_sets.len());
        for fv in unbound_sets {
            sets.push(format!("{} = {}", fv.field(), fv.value()));
        }
        for fv in bound_sets {
            sets.push(format!("{} = @{}", fv.field(), fv.field()));
            binds.push((format!("@{}", fv.field()), fv.value().clone()));
        }
        if sets.is_empty() {
            return Err(SqliteError::InvalidStatement(format!(
                "update of {table} has no SET expressions"
            )));
        }

        let sql = format!(
            "UPDATE {} SET {}{}",
            table,
            sets.join(", "),
            render_where(where_clauses, &mut binds)
        );
        self.execute(&sql, &binds)
    }

    /// Deletes the rows matching `where_clauses`. Returns the number removed.
    ///
    /// Every filtered field must have been registered for `table`; its value
    /// is coerced by the declared type before binding.
    pub fn delete_records(&self, table: &str, where_clauses: &[WhereClause]) -> Result<usize> {
        let typed = {
            let metadata = self.read_metadata();
            where_clauses
                .iter()
                .map(|clause| {
                    let data_type = metadata.field_def(table, clause.field())?.data_type();
                    let value = data_type.coerce(clause.value().clone())?;
                    Ok(WhereClause::new(clause.field(), clause.condition(), value))
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut binds = Vec::new();
        let sql = format!("DELETE FROM {}{}", table, render_where(&typed, &mut binds));
        self.execute(&sql, &binds)
    }

    /// Whether at least one row of `table` matches every clause.
    pub fn record_exists(&self, table: &str, where_clauses: &[WhereClause]) -> Result<bool> {
        let mut binds = Vec::new();
        let sql = format!("SELECT * FROM {}{}", table, render_where(where_clauses, &mut binds));
        debug!(%sql, binds = binds.len(), "executing statement");

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt.exists(named_params(&binds).as_slice())?)
    }

    /// Runs caller-supplied SQL verbatim, without binding.
    ///
    /// Each row becomes a record of untyped values named by result column.
    pub fn select_records(&self, sql: &str) -> Result<Vec<Record>> {
        debug!(%sql, "executing query");
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut records = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let record = names
                .iter()
                .enumerate()
                .map(|(idx, name)| Ok(FieldVal::new(name.as_str(), Value::from(row.get_ref(idx)?))))
                .collect::<Result<Record>>()?;
            records.push(record);
        }
        debug!(rows = records.len(), "query returned");
        Ok(records)
    }

    fn execute(&self, sql: &str, binds: &[(String, Value)]) -> Result<usize> {
        debug!(%sql, binds = binds.len(), "executing statement");
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        Ok(stmt.execute(named_params(binds).as_slice())?)
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(self.read_metadata().file())?)
    }

    fn read_metadata(&self) -> RwLockReadGuard<'_, Metadata> {
        self.metadata.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metadata(&self) -> RwLockWriteGuard<'_, Metadata> {
        self.metadata.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn table_exists_on(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND UPPER(name) = UPPER(?1)",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn field_exists_on(conn: &Connection, table: &str, field: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE UPPER(name) = UPPER(?2)",
        params![table, field],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn render_insert(table: &str, record: &Record) -> Result<(String, Binds)> {
    if record.is_empty() {
        return Err(SqliteError::InvalidStatement(format!(
            "insert into {table} has no fields"
        )));
    }
    let fields: Vec<&str> = record.field_vals().iter().map(FieldVal::field).collect();
    let binds: Binds = record
        .field_vals()
        .iter()
        .map(|fv| (format!("@{}", fv.field()), fv.value().clone()))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        fields.join(", "),
        binds
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok((sql, binds))
}

/// Renders ` WHERE f1 <op> @WHERE_f1 AND ...` and appends the binds.
///
/// A bind name already in use gets a numbered suffix (`@WHERE_f_2`,
/// `@WHERE_f_3`, ...) until it is unique. No clauses renders nothing.
fn render_where(where_clauses: &[WhereClause], binds: &mut Binds) -> String {
    if where_clauses.is_empty() {
        return String::new();
    }
    let mut issued: HashSet<String> = binds.iter().map(|(name, _)| name.clone()).collect();
    let terms: Vec<String> = where_clauses
        .iter()
        .map(|clause| {
            let base = format!("@{}{}", WHERE_BIND_PREFIX, clause.field());
            let mut bind = base.clone();
            let mut suffix = 1;
            while !issued.insert(bind.clone()) {
                suffix += 1;
                bind = format!("{base}_{suffix}");
            }
            let term = format!("{} {} {}", clause.field(), clause.condition(), bind);
            binds.push((bind, clause.value().clone()));
            term
        })
        .collect();
    format!(" WHERE {}", terms.join(" AND "))
}

fn named_params(binds: &[(String, Value)]) -> Vec<(&str, &dyn ToSql)> {
    binds
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}
