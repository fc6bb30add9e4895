use super::catalog;
use super::driver::SpannerDriver;
use super::{SpannerAdmin, SpannerSession};
use crate::core::{
    self, Migrator, Track, DEFAULT_DATA_MIGRATIONS_TABLE, DEFAULT_SCHEMA_MIGRATIONS_TABLE,
};
use crate::error::Error;
use crate::naming::DatabasePath;
use crate::runner::MigrationReport;

/// Names of the version tables of the two tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpannerMigratorConfig {
    schema_migrations_table: String,
    data_migrations_table: String,
}

impl Default for SpannerMigratorConfig {
    fn default() -> Self {
        Self {
            schema_migrations_table: DEFAULT_SCHEMA_MIGRATIONS_TABLE.to_string(),
            data_migrations_table: DEFAULT_DATA_MIGRATIONS_TABLE.to_string(),
        }
    }
}

impl SpannerMigratorConfig {
    pub fn with_schema_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.schema_migrations_table = table.into();
        self
    }

    pub fn with_data_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.data_migrations_table = table.into();
        self
    }

    pub fn schema_migrations_table(&self) -> &str {
        &self.schema_migrations_table
    }

    pub fn data_migrations_table(&self) -> &str {
        &self.data_migrations_table
    }

    /// The version table that records `track`.
    pub fn migrations_table(&self, track: Track) -> &str {
        match track {
            Track::Schema => &self.schema_migrations_table,
            Track::Data => &self.data_migrations_table,
        }
    }
}

/// Runs schema and data migrations against one existing Spanner database.
///
/// Both tracks share one session. Each migration run opens its own [SpannerDriver] over it, so
/// the session stays open until [SpannerMigrator::close].
#[derive(Debug)]
pub struct SpannerMigrator<S: SpannerSession> {
    path: DatabasePath,
    session: S,
    config: SpannerMigratorConfig,
}

impl<S: SpannerSession> SpannerMigrator<S> {
    pub fn new(path: DatabasePath, session: S) -> Self {
        Self {
            path,
            session,
            config: SpannerMigratorConfig::default(),
        }
    }

    /// Open a session on the database at `path` through `admin`.
    pub fn connect<A>(admin: &A, path: DatabasePath) -> Result<Self, Error>
    where
        A: SpannerAdmin<Session = S>,
    {
        let session = admin
            .connect(&path)
            .map_err(|e| e.context(format!("connecting to {path}")))?;
        Ok(Self::new(path, session))
    }

    pub fn with_config(mut self, config: SpannerMigratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SpannerMigratorConfig {
        &self.config
    }

    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Apply all pending up scripts of `source_url` to `track`.
    pub fn migrate_up(&self, track: Track, source_url: &str) -> Result<MigrationReport, Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("spanner_migrate_up", database = %self.path, %track).entered();

        let driver = SpannerDriver::new(&self.session, self.config.migrations_table(track));
        let report = core::apply_up(driver, source_url)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            source = %source_url,
            migrations_run = ?report.migrations_run,
            "Migrations applied"
        );
        Ok(report)
    }

    /// Apply every down script of `source_url` to `track`, back to the nil version.
    pub fn migrate_down(&self, track: Track, source_url: &str) -> Result<MigrationReport, Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("spanner_migrate_down", database = %self.path, %track).entered();

        let driver = SpannerDriver::new(&self.session, self.config.migrations_table(track));
        core::apply_down(driver, source_url)
    }

    /// See [catalog::drop_all_schema_objects]. The version tables are dropped too.
    pub fn drop_all_schema_objects(&self) -> Result<usize, Error> {
        catalog::drop_all_schema_objects(&self.session)
            .map_err(|e| e.context(format!("dropping schema of {}", self.path)))
    }

    pub fn close(self) -> Result<(), Error> {
        self.session.close()
    }
}

impl<S: SpannerSession> Migrator for SpannerMigrator<S> {
    fn migrate_up_schema(&self, source_url: &str) -> Result<MigrationReport, Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(source = %source_url, "Applying schema migrations");

        self.migrate_up(Track::Schema, source_url)
    }

    fn migrate_up_data(&self, source_url: &str) -> Result<MigrationReport, Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(source = %source_url, "Applying data migrations");

        self.migrate_up(Track::Data, source_url)
    }

    fn migrate_drop_schema(&self) -> Result<(), Error> {
        self.drop_all_schema_objects().map(|_| ())
    }
}
