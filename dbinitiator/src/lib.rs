#![cfg_attr(docsrs, feature(doc_cfg))]
//! `dbinitiator` provisions throwaway databases for integration tests and brings them to a known
//! schema with versioned migration scripts.
//!
//! Core concepts:
//! - A test starts an engine in a container once, then creates one fresh database per test, so
//!   tests never observe each other's data.
//! - Every database is migrated with plain `up` / `down` script files. The version applied last
//!   is recorded in the database itself, so re-running a migration is a no-op.
//!
//! # Dirty versions
//!
//! A migration that fails halfway leaves its version track *dirty*. The next `migrate_up` forces
//! the track back to the version before the interrupted one and runs the interrupted script
//! again from the start. `migrate_down` refuses to run on a dirty track.
//!
//! # Tracks
//!
//! PostgreSQL keeps a single track. Spanner cannot mix DDL and DML in one request, so a Spanner
//! database carries two independent tracks: schema scripts recorded in `SchemaMigrations` and
//! data scripts recorded in `DataMigrations`. See [Track] and [Migrator].
//!
//! # Resetting a Spanner schema
//!
//! [spanner::drop_all_schema_objects] reads the live catalog and drops every view, foreign key,
//! index and table in dependency order, in one batch.
//!
//! # Features
//!
//! - [`PostgreSQL`](postgres) - available with the `postgres` feature flag (default).
//! - Container provisioning ([provision]) - available with the `containers` feature flag (default).
//! - Tracing integration - available with the `tracing` feature flag (default).
//! - A [`google-cloud-spanner`](https://crates.io/crates/google-cloud-spanner) client for the
//!   emulator - available with the `gcloud` feature flag.

mod core;
pub use crate::core::{
    apply_down, apply_down_source, apply_up, apply_up_source, Migrator, Track,
    DEFAULT_DATA_MIGRATIONS_TABLE, DEFAULT_SCHEMA_MIGRATIONS_TABLE,
};

mod error;
pub use error::Error;

pub mod naming;
pub use naming::{postgres_conn_str, quote_identifier, DatabaseNamer, DatabasePath, Engine};

pub mod runner;
pub use runner::{Driver, MigrationReport, MigrationRunner, VersionRecord};

pub mod source;
pub use source::{MigrationSource, Script};

#[cfg(feature = "containers")]
#[cfg_attr(docsrs, doc(cfg(feature = "containers")))]
pub mod provision;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

pub mod spanner;

#[cfg(test)]
pub(crate) mod test_spanner;
