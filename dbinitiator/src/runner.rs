//!
//! # Migration runner
//!
//! [MigrationRunner] applies the scripts of one [MigrationSource] to one version track through a
//! database [Driver]. The version track holds a single [VersionRecord]: the last version that
//! started applying and whether it finished.
//!
//! Every script is bracketed by two writes to the track: `(version, dirty)` before it runs and
//! `(version, clean)` after it succeeds. A crash or failure between the two leaves the track dirty,
//! and [MigrationRunner::up] and [MigrationRunner::down] refuse to run until the track is forced
//! back to a clean version with [MigrationRunner::force].

use crate::error::Error;
use crate::source::MigrationSource;
#[cfg(feature = "tracing")]
use std::time::Instant;

/// The state of a version track.
///
/// A record with no version and a clean flag is the nil version: nothing has ever been applied,
/// or everything has been rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionRecord {
    pub version: Option<u64>,
    pub dirty: bool,
}

impl VersionRecord {
    pub const NIL: VersionRecord = VersionRecord {
        version: None,
        dirty: false,
    };

    pub fn clean(version: Option<u64>) -> Self {
        Self {
            version,
            dirty: false,
        }
    }

    pub fn dirty(version: Option<u64>) -> Self {
        Self {
            version,
            dirty: true,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.version.is_none() && !self.dirty
    }
}

/// A database adapter bound to one version track.
pub trait Driver {
    /// Read the current record of the track. Returns [VersionRecord::NIL] when nothing is recorded.
    fn version(&mut self) -> Result<VersionRecord, Error>;

    /// Replace the record of the track. Setting [VersionRecord::NIL] clears it.
    fn set_version(&mut self, record: VersionRecord) -> Result<(), Error>;

    /// Apply one script body.
    fn run(&mut self, script: &str) -> Result<(), Error>;

    /// Release the database handle held by this driver.
    fn close(&mut self) -> Result<(), Error>;
}

impl<D: Driver + ?Sized> Driver for &mut D {
    fn version(&mut self) -> Result<VersionRecord, Error> {
        (**self).version()
    }

    fn set_version(&mut self, record: VersionRecord) -> Result<(), Error> {
        (**self).set_version(record)
    }

    fn run(&mut self, script: &str) -> Result<(), Error> {
        (**self).run(script)
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }
}

/// A report of the versions a single runner call applied or rolled back, in execution order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MigrationReport {
    pub migrations_run: Vec<u64>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.migrations_run.is_empty()
    }
}

/// Applies one [MigrationSource] to one version track.
#[derive(Debug)]
pub struct MigrationRunner<D: Driver> {
    source: MigrationSource,
    driver: D,
}

impl<D: Driver> MigrationRunner<D> {
    pub fn new(source: MigrationSource, driver: D) -> Self {
        Self { source, driver }
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// The current record of the track.
    pub fn version(&mut self) -> Result<VersionRecord, Error> {
        self.driver.version()
    }

    /// Record `version` as cleanly applied without running anything. `None` clears the track.
    pub fn force(&mut self, version: Option<u64>) -> Result<(), Error> {
        self.driver.set_version(VersionRecord::clean(version))
    }

    /// Apply every pending up script in ascending version order, stopping at the first failure.
    /// Scripts that already succeeded stay applied.
    pub fn up(&mut self) -> Result<MigrationReport, Error> {
        let current = self.driver.version()?;
        if current.dirty {
            return Err(Error::Dirty {
                version: current.version,
            });
        }

        let mut report = MigrationReport::default();
        let mut next = match current.version {
            None => self.source.first(),
            Some(v) => self.source.next(v),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            current_version = ?current.version,
            pending = ?next,
            source = %self.source.url(),
            "Considering migrations to run"
        );

        while let Some(version) = next {
            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!("migration_up", version = version).entered();
            #[cfg(feature = "tracing")]
            let started = Instant::now();

            self.driver.set_version(VersionRecord::dirty(Some(version)))?;
            if let Some(script) = self.source.up_script(version) {
                #[cfg(feature = "tracing")]
                tracing::info!("Starting migration");
                if let Err(error) = self.driver.run(script) {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %error, "Migration failed");
                    return Err(error.context(format!("migration {version} up")));
                }
            }
            self.driver.set_version(VersionRecord::clean(Some(version)))?;

            #[cfg(feature = "tracing")]
            tracing::info!(
                duration_ms = started.elapsed().as_millis(),
                "Migration completed successfully"
            );

            report.migrations_run.push(version);
            next = self.source.next(version);
        }

        Ok(report)
    }

    /// Apply every down script from the current version back to nil.
    pub fn down(&mut self) -> Result<MigrationReport, Error> {
        let current = self.driver.version()?;
        if current.dirty {
            return Err(Error::Dirty {
                version: current.version,
            });
        }

        let mut report = MigrationReport::default();
        let mut current = current.version;

        while let Some(version) = current {
            if !self.source.contains(version) {
                return Err(Error::Source {
                    url: self.source.url().to_string(),
                    reason: format!("no migration found for version {version}"),
                });
            }

            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!("migration_down", version = version).entered();

            let target = self.source.prev(version);
            self.driver.set_version(VersionRecord::dirty(target))?;
            if let Some(script) = self.source.down_script(version) {
                #[cfg(feature = "tracing")]
                tracing::info!("Rolling back migration");
                if let Err(error) = self.driver.run(script) {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %error, "Rollback failed");
                    return Err(error.context(format!("migration {version} down")));
                }
            }
            self.driver.set_version(VersionRecord::clean(target))?;

            report.migrations_run.push(version);
            current = target;
        }

        Ok(report)
    }

    /// Release the source and the database handle, returning both outcomes.
    pub fn close(mut self) -> (Result<(), Error>, Result<(), Error>) {
        // Sources are fully read when opened; there is nothing left to release.
        let source = Ok(());
        let database = self.driver.close();
        (source, database)
    }
}
