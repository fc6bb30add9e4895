use super::statements::{self, StatementKind};
use super::{ColumnKind, SpannerSession};
use crate::error::Error;
use crate::runner::{Driver, VersionRecord};

/// Stored in place of a version when a rollback to nil was interrupted.
const NIL_VERSION: i64 = -1;

/// A [Driver] that records one track in its own Spanner table.
///
/// The session is borrowed and is not closed by [Driver::close]; several drivers, one per track,
/// can share the session of one [SpannerMigrator](super::SpannerMigrator).
#[derive(Debug)]
pub struct SpannerDriver<'a, S: SpannerSession + ?Sized> {
    session: &'a S,
    table: String,
    table_ready: bool,
}

impl<'a, S: SpannerSession + ?Sized> SpannerDriver<'a, S> {
    pub fn new(session: &'a S, table: impl Into<String>) -> Self {
        Self {
            session,
            table: table.into(),
            table_ready: false,
        }
    }

    pub fn migrations_table(&self) -> &str {
        &self.table
    }

    fn ensure_table(&mut self) -> Result<(), Error> {
        if self.table_ready {
            return Ok(());
        }

        let existing = self
            .session
            .query(&table_exists_query(&self.table), &[ColumnKind::String])
            .map_err(|e| e.context(format!("looking up version table {}", self.table)))?;
        if existing.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::info!(table = %self.table, "Creating migration tracking table");

            self.session
                .update_ddl(&[create_table_statement(&self.table)])
                .map_err(|e| e.context(format!("creating version table {}", self.table)))?;
        }

        self.table_ready = true;
        Ok(())
    }
}

pub(crate) fn table_exists_query(table: &str) -> String {
    format!(
        "SELECT TABLE_NAME FROM information_schema.tables WHERE TABLE_SCHEMA = '' AND TABLE_NAME = '{}'",
        table.replace('\'', "\\'")
    )
}

pub(crate) fn create_table_statement(table: &str) -> String {
    format!("CREATE TABLE `{table}` (Version INT64 NOT NULL, Dirty BOOL NOT NULL) PRIMARY KEY (Version)")
}

pub(crate) fn read_version_query(table: &str) -> String {
    format!("SELECT Version, Dirty FROM `{table}` LIMIT 1")
}

impl<S: SpannerSession + ?Sized> Driver for SpannerDriver<'_, S> {
    fn version(&mut self) -> Result<VersionRecord, Error> {
        self.ensure_table()?;

        let rows = self.session.query(
            &read_version_query(&self.table),
            &[ColumnKind::Int64, ColumnKind::Bool],
        )?;
        let Some(row) = rows.first() else {
            return Ok(VersionRecord::NIL);
        };

        Ok(VersionRecord {
            version: u64::try_from(row.int64(0)?).ok(),
            dirty: row.bool(1)?,
        })
    }

    fn set_version(&mut self, record: VersionRecord) -> Result<(), Error> {
        self.ensure_table()?;

        let mut dml = vec![format!("DELETE FROM `{}` WHERE true", self.table)];
        if !record.is_nil() {
            let version = match record.version {
                Some(v) => i64::try_from(v)
                    .map_err(|_| Error::Generic(format!("version {v} does not fit INT64")))?,
                None => NIL_VERSION,
            };
            dml.push(format!(
                "INSERT INTO `{}` (Version, Dirty) VALUES ({version}, {})",
                self.table, record.dirty
            ));
        }
        self.session.execute_dml(&dml)
    }

    fn run(&mut self, script: &str) -> Result<(), Error> {
        let statements = statements::split(script);
        match statements::classify(&statements)? {
            None => Ok(()),
            Some(StatementKind::Ddl) => self.session.update_ddl(&statements),
            Some(StatementKind::Dml) => self.session.execute_dml(&statements),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
