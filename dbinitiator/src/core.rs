use crate::error::Error;
use crate::runner::{Driver, MigrationReport, MigrationRunner};
use crate::source::MigrationSource;

/// Default version table of the schema (DDL) track.
pub const DEFAULT_SCHEMA_MIGRATIONS_TABLE: &str = "SchemaMigrations";
/// Default version table of the data (DML) track.
pub const DEFAULT_DATA_MIGRATIONS_TABLE: &str = "DataMigrations";

/// An independently versioned migration lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    /// DDL migrations.
    Schema,
    /// DML migrations.
    Data,
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Track::Schema => f.write_str("schema"),
            Track::Data => f.write_str("data"),
        }
    }
}

/// The operations every engine's migrator exposes to test harnesses.
pub trait Migrator {
    /// Apply all pending schema migrations from `source_url`.
    fn migrate_up_schema(&self, source_url: &str) -> Result<MigrationReport, Error>;

    /// Apply all pending data migrations from `source_url`.
    fn migrate_up_data(&self, source_url: &str) -> Result<MigrationReport, Error>;

    /// Drop every object in the database schema.
    fn migrate_drop_schema(&self) -> Result<(), Error>;
}

/// Apply every pending up script of the source at `source_url` through `driver`.
///
/// A track left dirty by an interrupted run is first forced back to the version before the
/// interrupted one, so the interrupted script is retried from the start. A track with no record
/// at all is a fresh database and is not forced.
///
/// The driver is always closed. A release failure is returned even when the migration succeeded,
/// and keeps the migration error in its chain when it did not.
pub fn apply_up<D: Driver>(mut driver: D, source_url: &str) -> Result<MigrationReport, Error> {
    match MigrationSource::open(source_url) {
        Ok(source) => apply_up_source(driver, source),
        Err(error) => finish(
            Err(wrap("MigrationSource::open", source_url, error)),
            (Ok(()), driver.close()),
            source_url,
        ),
    }
}

/// [apply_up] for a source that is already open, such as an embedded one.
pub fn apply_up_source<D: Driver>(
    driver: D,
    source: MigrationSource,
) -> Result<MigrationReport, Error> {
    let source_url = source.url().to_string();
    let mut runner = MigrationRunner::new(source, driver);

    let result = recover_dirty(&mut runner)
        .and_then(|()| runner.up())
        .map_err(|error| wrap("MigrationRunner::up", &source_url, error));

    finish(result, runner.close(), &source_url)
}

/// Apply every down script of the source at `source_url`, back to the nil version.
pub fn apply_down<D: Driver>(mut driver: D, source_url: &str) -> Result<MigrationReport, Error> {
    match MigrationSource::open(source_url) {
        Ok(source) => apply_down_source(driver, source),
        Err(error) => finish(
            Err(wrap("MigrationSource::open", source_url, error)),
            (Ok(()), driver.close()),
            source_url,
        ),
    }
}

/// [apply_down] for a source that is already open.
pub fn apply_down_source<D: Driver>(
    driver: D,
    source: MigrationSource,
) -> Result<MigrationReport, Error> {
    let source_url = source.url().to_string();
    let mut runner = MigrationRunner::new(source, driver);

    let result = runner
        .down()
        .map_err(|error| wrap("MigrationRunner::down", &source_url, error));

    finish(result, runner.close(), &source_url)
}

/// Force a dirty track back one version so the interrupted script runs again in full.
fn recover_dirty<D: Driver>(runner: &mut MigrationRunner<D>) -> Result<(), Error> {
    let record = runner.version()?;
    if !record.dirty {
        return Ok(());
    }

    let target = record.version.and_then(|v| runner.source().prev(v));

    #[cfg(feature = "tracing")]
    tracing::info!(
        dirty_version = ?record.version,
        forced_version = ?target,
        source = %runner.source().url(),
        "Forcing dirty version track back before retrying"
    );

    runner
        .force(target)
        .map_err(|error| error.context("MigrationRunner::force"))
}

fn wrap(operation: &'static str, source_url: &str, error: Error) -> Error {
    Error::Migration {
        operation,
        source_url: source_url.to_string(),
        error: Box::new(error),
    }
}

fn finish<T>(
    mut result: Result<T, Error>,
    closed: (Result<(), Error>, Result<(), Error>),
    source_url: &str,
) -> Result<T, Error> {
    let (source, database) = closed;
    for (resource, released) in [("source", source), ("database", database)] {
        if let Err(error) = released {
            #[cfg(feature = "tracing")]
            tracing::error!(resource, error = %error, source = %source_url, "Closing migration failed");

            result = Err(Error::Release {
                resource,
                source_url: source_url.to_string(),
                error: Box::new(error),
                primary: result.err().map(Box::new),
            });
        }
    }
    result
}
