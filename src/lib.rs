//! Schema-evolving SQLite data access.
//!
//! # Intention
//!
//! - Declare tables and columns in code with [`FieldDef`]; the database
//!   schema is created or widened on first declaration, never dropped.
//! - Move rows in and out as [`Record`]s, filter with AND-joined
//!   [`WhereClause`]s, and bind every value as a parameter.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - One [`SqliteUtil`] per database file; each call opens and closes its own
//!   connection. No pooling, no multi-call transactions, no migrations.
//! - Table and column names are trusted input.

pub mod error;
pub mod kvp;
pub mod metadata;
pub mod sqlite;
pub mod types;

pub use error::{Result, SqliteError};
pub use kvp::{KeyValueStore, SqliteKvp};
pub use metadata::Metadata;
pub use sqlite::{SqliteConfig, SqliteUtil};
pub use types::{DataType, FieldDef, FieldVal, Record, Value, WhereClause, WhereCondition};
