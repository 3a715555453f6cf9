use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, SqliteError};
use crate::types::FieldDef;

/// In-memory registry of declared tables and fields for one database file.
///
/// The registry is rebuilt every time the process starts and never persisted.
/// Declarations are kept in registration order per table.
#[derive(Debug, Clone)]
pub struct Metadata {
    file: PathBuf,
    tables: BTreeMap<String, Vec<FieldDef>>,
}

impl Metadata {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            tables: BTreeMap::new(),
        }
    }

    /// The database file this registry is bound to.
    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn register_table(&mut self, table: &str) {
        if !self.tables.contains_key(table) {
            self.tables.insert(table.to_string(), Vec::new());
        }
    }

    /// Records `field_def` under its table.
    ///
    /// A repeated declaration of the same field is ignored; the first one
    /// wins. Returns `true` when the declaration was new.
    pub fn register_field(&mut self, field_def: FieldDef) -> bool {
        self.register_table(field_def.table());
        let fields = self.tables.entry(field_def.table().to_string()).or_default();
        if let Some(existing) = fields.iter().find(|f| f.field() == field_def.field()) {
            if existing.data_type() != field_def.data_type() {
                warn!(
                    table = field_def.table(),
                    field = field_def.field(),
                    declared = %existing.data_type(),
                    ignored = %field_def.data_type(),
                    "field re-declared with a different type"
                );
            }
            return false;
        }
        fields.push(field_def);
        true
    }

    pub fn fields(&self, table: &str) -> Result<&[FieldDef]> {
        self.tables
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| SqliteError::TableNotRegistered(table.to_string()))
    }

    pub fn field_def(&self, table: &str, field: &str) -> Result<&FieldDef> {
        self.fields(table)?
            .iter()
            .find(|f| f.field() == field)
            .ok_or_else(|| SqliteError::FieldNotRegistered {
                table: table.to_string(),
                field: field.to_string(),
            })
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "file: {}", self.file.display())?;
        for (table, fields) in &self.tables {
            writeln!(f, "{table}")?;
            for field in fields {
                writeln!(f, "  - {} {}", field.field(), field.data_type())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn register_table_is_a_no_op_when_present() {
        let mut metadata = Metadata::new("test.db");
        metadata.register_field(FieldDef::new("WIDGET", "NAME", DataType::Text));
        metadata.register_table("WIDGET");
        assert_eq!(metadata.fields("WIDGET").unwrap().len(), 1);
        assert_eq!(metadata.file(), Path::new("test.db"));
    }

    #[test]
    fn lookup_finds_declared_fields_in_order() {
        let mut metadata = Metadata::new("test.db");
        assert!(metadata.register_field(FieldDef::new("WIDGET", "ID", DataType::Text)));
        assert!(metadata.register_field(FieldDef::new("WIDGET", "SEEN_DT", DataType::DateTime)));

        let def = metadata.field_def("WIDGET", "SEEN_DT").unwrap();
        assert_eq!(def.data_type(), DataType::DateTime);
        let names: Vec<_> = metadata
            .fields("WIDGET")
            .unwrap()
            .iter()
            .map(FieldDef::field)
            .collect();
        assert_eq!(names, ["ID", "SEEN_DT"]);
    }

    #[test]
    fn repeated_declarations_keep_the_first() {
        let mut metadata = Metadata::new("test.db");
        assert!(metadata.register_field(FieldDef::new("WIDGET", "ID", DataType::Text)));
        assert!(!metadata.register_field(FieldDef::new("WIDGET", "ID", DataType::Text)));
        assert!(!metadata.register_field(FieldDef::new("WIDGET", "ID", DataType::Integer)));

        assert_eq!(metadata.fields("WIDGET").unwrap().len(), 1);
        assert_eq!(
            metadata.field_def("WIDGET", "ID").unwrap().data_type(),
            DataType::Text
        );
    }

    #[test]
    fn unknown_tables_and_fields_are_errors() {
        let mut metadata = Metadata::new("test.db");
        assert!(matches!(
            metadata.field_def("NOPE", "ID"),
            Err(SqliteError::TableNotRegistered(t)) if t == "NOPE"
        ));

        metadata.register_table("WIDGET");
        assert!(matches!(
            metadata.field_def("WIDGET", "ID"),
            Err(SqliteError::FieldNotRegistered { .. })
        ));
    }

    #[test]
    fn display_lists_tables_and_fields() {
        let mut metadata = Metadata::new("test.db");
        metadata.register_field(FieldDef::new("WIDGET", "NAME", DataType::Text));
        let printed = metadata.to_string();
        assert!(printed.contains("file: test.db"));
        assert!(printed.contains("WIDGET"));
        assert!(printed.contains("  - NAME TEXT"));
    }
}
