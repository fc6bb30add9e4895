//!
//! # Spanner test databases
//!
//! Spanner migrations are split into two independently versioned tracks on the same database:
//! schema (DDL) scripts recorded in `SchemaMigrations`, and data (DML) scripts recorded in
//! `DataMigrations`. Spanner cannot mix DDL and DML in one request, so each track's scripts must
//! contain only one kind of statement.
//!
//! Between tests a database can be reset with [SpannerMigrator::drop_all_schema_objects], which
//! reads the live catalog and drops every view, foreign key, index and table in an order Spanner
//! accepts, as one DDL batch.
//!
//! ## Client seams
//!
//! This module talks to Spanner only through two traits:
//! - [SpannerAdmin]: instance and database administration, and opening sessions.
//! - [SpannerSession]: queries, DML transactions and DDL batches against one database.
//!
//! Both are blocking: every long-running operation is waited on before the call returns. The
//! `gcloud` feature provides implementations backed by
//! [`google-cloud-spanner`](https://crates.io/crates/google-cloud-spanner).
//!
//! There is no cancellation hook. Instance creation, database creation and DDL batches wait for
//! their operation to finish, however long it takes; a caller that needs a deadline has to
//! enforce it around the call, for example from another thread that terminates the container.
//!
//! ## Example
//!
//! ```ignore
//! use dbinitiator::spanner::{SpannerMigrator, SpannerMigratorConfig};
//! use dbinitiator::{DatabasePath, Migrator};
//!
//! let path = DatabasePath::new("unit-testing", "test-instance", "orders");
//! let migrator = SpannerMigrator::connect(&admin, path)?.with_config(
//!     SpannerMigratorConfig::default().with_schema_migrations_table("OrderSchemaMigrations"),
//! );
//! migrator.migrate_up_schema("file://testdata/spanner/migrations")?;
//! migrator.migrate_up_data("file://testdata/spanner/datamigrations")?;
//! migrator.migrate_drop_schema()?;
//! migrator.close()?;
//! ```

use crate::error::Error;
use crate::naming::DatabasePath;

pub(crate) mod catalog;
#[cfg(feature = "containers")]
mod container;
mod database;
pub(crate) mod driver;
mod migrator;
mod statements;

#[cfg(feature = "gcloud")]
#[cfg_attr(docsrs, doc(cfg(feature = "gcloud")))]
pub mod gcloud;

pub use catalog::{
    drop_all_schema_objects, CatalogForeignKey, CatalogIndex, CatalogTable, CatalogView,
    IndexKind, SchemaCatalog, MAX_INTERLEAVE_DEPTH,
};
#[cfg(feature = "containers")]
#[cfg_attr(docsrs, doc(cfg(feature = "containers")))]
pub use container::SpannerContainer;
pub use database::SpannerDatabase;
pub use driver::SpannerDriver;
pub use migrator::{SpannerMigrator, SpannerMigratorConfig};

pub const EMULATOR_IMAGE: &str = "gcr.io/cloud-spanner-emulator/emulator";
pub const EMULATOR_PORT: u16 = 9010;
pub const DEFAULT_PROJECT_ID: &str = "unit-testing";
pub const DEFAULT_INSTANCE_ID: &str = "test-instance";

/// The decoded type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Int64,
    Bool,
}

/// One decoded column value. Every column is nullable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    String(String),
    Int64(i64),
    Bool(bool),
}

/// One result row, with values in select-list order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Value> {
        self.0.get(i)
    }

    fn value(&self, i: usize) -> Result<&Value, Error> {
        self.0
            .get(i)
            .ok_or_else(|| Error::Spanner(format!("column {i} out of range for {} columns", self.0.len())))
    }

    fn mismatch(&self, i: usize, want: &str) -> Error {
        Error::Spanner(format!("column {i}: expected {want}, found {:?}", self.0.get(i)))
    }

    pub fn opt_string(&self, i: usize) -> Result<Option<&str>, Error> {
        match self.value(i)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            _ => Err(self.mismatch(i, "STRING")),
        }
    }

    /// A non-null string column.
    pub fn string(&self, i: usize) -> Result<&str, Error> {
        self.opt_string(i)?
            .ok_or_else(|| self.mismatch(i, "non-null STRING"))
    }

    pub fn int64(&self, i: usize) -> Result<i64, Error> {
        match self.value(i)? {
            Value::Int64(v) => Ok(*v),
            _ => Err(self.mismatch(i, "INT64")),
        }
    }

    pub fn bool(&self, i: usize) -> Result<bool, Error> {
        match self.value(i)? {
            Value::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(i, "BOOL")),
        }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// A connection to one Spanner database.
pub trait SpannerSession {
    /// Run a read-only query in a single-use transaction, decoding each column as `columns` says.
    fn query(&self, sql: &str, columns: &[ColumnKind]) -> Result<Vec<Row>, Error>;

    /// Run DML statements in order in one read-write transaction.
    fn execute_dml(&self, statements: &[String]) -> Result<(), Error>;

    /// Submit DDL statements as one schema update and wait for it to complete.
    fn update_ddl(&self, statements: &[String]) -> Result<(), Error>;

    /// Release the session.
    fn close(&self) -> Result<(), Error>;
}

impl<S: SpannerSession + ?Sized> SpannerSession for &S {
    fn query(&self, sql: &str, columns: &[ColumnKind]) -> Result<Vec<Row>, Error> {
        (**self).query(sql, columns)
    }

    fn execute_dml(&self, statements: &[String]) -> Result<(), Error> {
        (**self).execute_dml(statements)
    }

    fn update_ddl(&self, statements: &[String]) -> Result<(), Error> {
        (**self).update_ddl(statements)
    }

    fn close(&self) -> Result<(), Error> {
        (**self).close()
    }
}

/// Instance and database administration.
pub trait SpannerAdmin {
    type Session: SpannerSession;

    /// Create an instance and wait until it is ready.
    fn create_instance(&self, project_id: &str, instance_id: &str) -> Result<(), Error>;

    /// Create an empty database and wait for the operation to complete.
    fn create_database(&self, path: &DatabasePath) -> Result<(), Error>;

    fn drop_database(&self, path: &DatabasePath) -> Result<(), Error>;

    /// Open a session on an existing database.
    fn connect(&self, path: &DatabasePath) -> Result<Self::Session, Error>;

    /// Release the admin clients. Administration calls made afterwards fail, while sessions
    /// already returned by [SpannerAdmin::connect] stay usable until they are closed.
    fn close(&self) -> Result<(), Error>;
}
