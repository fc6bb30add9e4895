use super::driver::SpannerDriver;
use super::{ColumnKind, Row, SpannerAdmin, SpannerSession};
use crate::core::{self, DEFAULT_SCHEMA_MIGRATIONS_TABLE};
use crate::error::Error;
use crate::naming::DatabasePath;
use crate::runner::MigrationReport;

/// A database created for one test, with an open session.
pub struct SpannerDatabase<'a, A: SpannerAdmin> {
    admin: &'a A,
    path: DatabasePath,
    session: A::Session,
}

impl<A: SpannerAdmin> std::fmt::Debug for SpannerDatabase<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpannerDatabase")
            .field("path", &self.path)
            .finish()
    }
}

impl<'a, A: SpannerAdmin> SpannerDatabase<'a, A> {
    /// Create the database at `path` and open a session on it.
    pub fn create(admin: &'a A, path: DatabasePath) -> Result<Self, Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(database = %path, "Creating spanner database");

        admin.create_database(&path)?;
        let session = admin.connect(&path)?;
        Ok(Self {
            admin,
            path,
            session,
        })
    }

    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    /// The database id, without the project and instance.
    pub fn name(&self) -> &str {
        self.path.database()
    }

    pub fn session(&self) -> &A::Session {
        &self.session
    }

    pub fn query(&self, sql: &str, columns: &[ColumnKind]) -> Result<Vec<Row>, Error> {
        self.session.query(sql, columns)
    }

    /// Apply the schema track of every source, in order. All sources share `SchemaMigrations`,
    /// so each source must start above the last version of the one before it.
    pub fn migrate_up(&self, source_urls: &[&str]) -> Result<MigrationReport, Error> {
        let mut report = MigrationReport::default();
        for url in source_urls {
            let driver = SpannerDriver::new(&self.session, DEFAULT_SCHEMA_MIGRATIONS_TABLE);
            let applied = core::apply_up(driver, url)?;
            report.migrations_run.extend(applied.migrations_run);
        }
        Ok(report)
    }

    /// Revert the schema track back to the nil version.
    pub fn migrate_down(&self, source_url: &str) -> Result<MigrationReport, Error> {
        let driver = SpannerDriver::new(&self.session, DEFAULT_SCHEMA_MIGRATIONS_TABLE);
        core::apply_down(driver, source_url)
    }

    /// Close the session and drop the database. The drop is attempted even when closing fails.
    pub fn drop_database(self) -> Result<(), Error> {
        let closed = self.session.close();
        self.admin
            .drop_database(&self.path)
            .map_err(|e| e.context(format!("dropping {}", self.path)))?;
        closed
    }

    /// Close the session, leaving the database in place.
    pub fn close(self) -> Result<(), Error> {
        self.session.close()
    }
}
