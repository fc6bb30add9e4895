//!
//! # PostgreSQL test databases
//!
//! This module provisions PostgreSQL databases for integration tests using the
//! [`postgres`](https://crates.io/crates/postgres) crate.
//!
//! A [PostgresContainer] runs one server. Every call to [PostgresContainer::create_database]
//! creates a fresh database owned by an unprivileged role, so tests exercise the same permission
//! model as production code, and each test can migrate and mutate its own database in isolation.
//!
//! ## Version tracking
//!
//! PostgreSQL uses a single version track, stored in `schema_migrations`:
//!
//! | Column | Type | Meaning |
//! |--------|------|---------|
//! | `version` | `bigint` | last version that started applying, `-1` for a dirty nil version |
//! | `dirty` | `boolean` | the script for `version` did not finish |
//!
//! Each script runs as one multi-statement batch. PostgreSQL runs DDL transactionally, but a batch
//! that fails halfway still leaves the track dirty, and the next [PostgresDatabase::migrate_up]
//! retries the interrupted version from the start.
//!
//! ## Example
//!
//! ```ignore
//! use dbinitiator::postgres::PostgresContainer;
//!
//! let container = PostgresContainer::new("16")?;
//! let mut db = container.create_database("TestUsers/create")?;
//! db.migrate_up(&["file://testdata/postgres/migrations"])?;
//! let rows = db.query("SELECT count(*) FROM users", &[])?;
//! db.close()?;
//! container.terminate()?;
//! ```

use crate::core::{self, Migrator};
use crate::error::Error;
use crate::naming::{postgres_conn_str, quote_identifier};
use crate::runner::{Driver, MigrationReport, VersionRecord};
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};

#[cfg(feature = "containers")]
use crate::naming::{DatabaseNamer, Engine};
#[cfg(feature = "containers")]
use crate::provision::{ContainerSpec, LogStream, ProvisionedContainer};
#[cfg(feature = "containers")]
use std::collections::HashMap;
#[cfg(feature = "containers")]
use std::sync::{Mutex, PoisonError};

pub const POSTGRES_IMAGE: &str = "postgres";
pub const POSTGRES_PORT: u16 = 5432;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_DATABASE: &str = "postgres";
pub const SUPERUSER: &str = "postgres";
pub const UNPRIVILEGED_USER: &str = "unprivileged";
pub const DEFAULT_PASSWORD: &str = "password";
/// Version table of the single PostgreSQL track.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Stored in place of a version when a rollback to nil was interrupted.
const NIL_VERSION: i64 = -1;

fn connect(conn_str: &str) -> Result<Client, Error> {
    Client::connect(conn_str, NoTls).map_err(Error::from)
}

/// A [Driver] over its own connection to one PostgreSQL database.
pub struct PostgresDriver {
    client: Option<Client>,
    table: String,
    table_ready: bool,
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver")
            .field("table", &self.table)
            .field("closed", &self.client.is_none())
            .finish()
    }
}

impl PostgresDriver {
    pub fn connect(conn_str: &str) -> Result<Self, Error> {
        Ok(Self::new(connect(conn_str)?))
    }

    pub fn new(client: Client) -> Self {
        Self {
            client: Some(client),
            table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            table_ready: false,
        }
    }

    /// Track versions in `table` instead of [DEFAULT_MIGRATIONS_TABLE].
    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self.table_ready = false;
        self
    }

    pub fn migrations_table(&self) -> &str {
        &self.table
    }

    fn client(&mut self) -> Result<&mut Client, Error> {
        self.client
            .as_mut()
            .ok_or_else(|| Error::Generic("postgres migration driver is closed".to_string()))
    }

    fn ensure_table(&mut self) -> Result<(), Error> {
        if self.table_ready {
            return Ok(());
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (version bigint NOT NULL PRIMARY KEY, dirty boolean NOT NULL)",
            quote_identifier(&self.table)
        );
        self.client()?.batch_execute(&sql)?;
        self.table_ready = true;
        Ok(())
    }
}

impl Driver for PostgresDriver {
    fn version(&mut self) -> Result<VersionRecord, Error> {
        self.ensure_table()?;
        let sql = format!(
            "SELECT version, dirty FROM {} LIMIT 1",
            quote_identifier(&self.table)
        );
        let rows = self.client()?.query(sql.as_str(), &[])?;
        let Some(row) = rows.first() else {
            return Ok(VersionRecord::NIL);
        };

        let version: i64 = row.try_get(0)?;
        let dirty: bool = row.try_get(1)?;
        Ok(VersionRecord {
            version: u64::try_from(version).ok(),
            dirty,
        })
    }

    fn set_version(&mut self, record: VersionRecord) -> Result<(), Error> {
        self.ensure_table()?;
        let table = quote_identifier(&self.table);

        let mut tx = self.client()?.transaction()?;
        tx.batch_execute(&format!("TRUNCATE {table}"))?;
        if !record.is_nil() {
            let version = match record.version {
                Some(v) => i64::try_from(v).map_err(|_| {
                    Error::Generic(format!("version {v} does not fit a bigint column"))
                })?,
                None => NIL_VERSION,
            };
            tx.execute(
                format!("INSERT INTO {table} (version, dirty) VALUES ($1, $2)").as_str(),
                &[&version, &record.dirty],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn run(&mut self, script: &str) -> Result<(), Error> {
        self.client()?.batch_execute(script)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        match self.client.take() {
            Some(client) => client.close().map_err(Error::from),
            None => Ok(()),
        }
    }
}

/// A database created for one test, connected as its owner.
pub struct PostgresDatabase {
    client: Client,
    name: String,
    schema: String,
    conn_str: String,
}

impl std::fmt::Debug for PostgresDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDatabase")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl PostgresDatabase {
    /// Create `database` owned by `username` on an existing server, then create `schema` in it.
    ///
    /// `username` needs the `CREATEDB` privilege.
    pub fn create(
        username: &str,
        password: &str,
        host: &str,
        port: u16,
        database: &str,
        schema: &str,
    ) -> Result<Self, Error> {
        let admin_conn_str = postgres_conn_str(username, password, host, port, DEFAULT_DATABASE);
        let mut admin = connect(&admin_conn_str).map_err(|e| {
            e.context(format!(
                "failed to connect to default database '{DEFAULT_DATABASE}' as user {username}"
            ))
        })?;

        let create = format!(
            "CREATE DATABASE {} WITH OWNER {}",
            quote_identifier(database),
            quote_identifier(username)
        );
        let created = admin.batch_execute(&create).map_err(|e| {
            Error::from(e).context(format!(
                "failed to execute CREATE DATABASE {database} WITH OWNER {username}"
            ))
        });
        admin.close()?;
        created?;

        let conn_str = postgres_conn_str(username, password, host, port, database);
        let mut client = connect(&conn_str).map_err(|e| {
            e.context(format!(
                "failed to connect to newly created database {database} as user {username}"
            ))
        })?;

        let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema));
        if let Err(e) = client.batch_execute(&create_schema) {
            let error = Error::from(e).context(format!(
                "failed to create schema {schema} in database {database}"
            ));
            return Err(match client.close() {
                Ok(()) => error,
                Err(close) => Error::from(close).context(error.to_string()),
            });
        }

        Ok(Self {
            client,
            name: database.to_string(),
            schema: schema.to_string(),
            conn_str,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema created for the database owner.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn conn_str(&self) -> &str {
        &self.conn_str
    }

    pub fn batch_execute(&mut self, sql: &str) -> Result<(), Error> {
        self.client.batch_execute(sql).map_err(Error::from)
    }

    pub fn query(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, Error> {
        self.client.query(sql, params).map_err(Error::from)
    }

    /// Apply every up migration of every source, in order. All sources share one version track,
    /// so each source must start above the last version of the one before it.
    pub fn migrate_up(&self, source_urls: &[&str]) -> Result<MigrationReport, Error> {
        let mut report = MigrationReport::default();
        for url in source_urls {
            let driver = PostgresDriver::connect(&self.conn_str)
                .map_err(|e| e.context(format!("PostgresDriver::connect(): {url}")))?;
            let applied = core::apply_up(driver, url)?;
            report.migrations_run.extend(applied.migrations_run);
        }
        Ok(report)
    }

    /// Apply every down migration of `source_url`, back to the nil version.
    pub fn migrate_down(&self, source_url: &str) -> Result<MigrationReport, Error> {
        let driver = PostgresDriver::connect(&self.conn_str)
            .map_err(|e| e.context(format!("PostgresDriver::connect(): {source_url}")))?;
        core::apply_down(driver, source_url)
    }

    pub fn close(self) -> Result<(), Error> {
        self.client.close().map_err(Error::from)
    }
}

/// Runs migrations against an existing PostgreSQL database. It does not create the database.
#[derive(Debug, Clone)]
pub struct PostgresMigrator {
    conn_str: String,
}

impl PostgresMigrator {
    pub fn new(username: &str, password: &str, host: &str, port: u16, database: &str) -> Self {
        Self {
            conn_str: postgres_conn_str(username, password, host, port, database),
        }
    }

    pub fn from_conn_str(conn_str: impl Into<String>) -> Self {
        Self {
            conn_str: conn_str.into(),
        }
    }

    pub fn conn_str(&self) -> &str {
        &self.conn_str
    }
}

impl Migrator for PostgresMigrator {
    fn migrate_up_schema(&self, source_url: &str) -> Result<MigrationReport, Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(source = %source_url, "Applying schema migrations");

        let driver = PostgresDriver::connect(&self.conn_str)
            .map_err(|e| e.context(format!("PostgresDriver::connect(): {source_url}")))?;
        core::apply_up(driver, source_url)
    }

    fn migrate_up_data(&self, _source_url: &str) -> Result<MigrationReport, Error> {
        Err(Error::NotImplemented("PostgresMigrator::migrate_up_data"))
    }

    fn migrate_drop_schema(&self) -> Result<(), Error> {
        Err(Error::NotImplemented("PostgresMigrator::migrate_drop_schema"))
    }
}

/// A PostgreSQL server in a container, with an unprivileged role that owns every test database.
#[cfg(feature = "containers")]
#[cfg_attr(docsrs, doc(cfg(feature = "containers")))]
pub struct PostgresContainer {
    container: ProvisionedContainer,
    superuser: String,
    unprivileged: String,
    password: String,
    default_database: String,
    superuser_connections: Mutex<HashMap<String, Client>>,
    namer: DatabaseNamer,
}

#[cfg(feature = "containers")]
impl std::fmt::Debug for PostgresContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresContainer")
            .field("container", &self.container)
            .field("unprivileged", &self.unprivileged)
            .finish()
    }
}

#[cfg(feature = "containers")]
impl PostgresContainer {
    /// The container started by [PostgresContainer::new].
    pub fn container_spec(image_version: &str) -> ContainerSpec {
        ContainerSpec::new(POSTGRES_IMAGE, image_version, POSTGRES_PORT)
            .with_cmd(["postgres", "-c", "max_connections=250"])
            .with_env("POSTGRES_PASSWORD", DEFAULT_PASSWORD)
            // The first message comes from the temporary server used by initdb.
            .with_ready_log(
                LogStream::Stdout,
                "database system is ready to accept connections",
            )
            .with_ready_log(
                LogStream::Stderr,
                "database system is ready to accept connections",
            )
    }

    /// Start `postgres:<image_version>` and create the unprivileged role.
    pub fn new(image_version: &str) -> Result<Self, Error> {
        let container = ProvisionedContainer::start(&Self::container_spec(image_version))?;
        let pc = Self {
            container,
            superuser: SUPERUSER.to_string(),
            unprivileged: UNPRIVILEGED_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            default_database: DEFAULT_DATABASE.to_string(),
            superuser_connections: Mutex::new(HashMap::new()),
            namer: DatabaseNamer::new(Engine::Postgres),
        };
        pc.add_unprivileged_user()?;
        Ok(pc)
    }

    pub fn host(&self) -> &str {
        self.container.host()
    }

    pub fn port(&self) -> u16 {
        self.container.mapped_port()
    }

    /// The role that owns databases created by this container.
    pub fn username(&self) -> &str {
        &self.unprivileged
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn conn_str(&self, username: &str, database: &str) -> String {
        postgres_conn_str(username, &self.password, self.host(), self.port(), database)
    }

    /// Run `f` on the cached superuser connection to `database`, reconnecting if it was closed.
    fn with_superuser<T>(
        &self,
        database: &str,
        f: impl FnOnce(&mut Client) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut connections = self
            .superuser_connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if connections.get(database).map_or(true, Client::is_closed) {
            let client = connect(&self.conn_str(&self.superuser, database))?;
            connections.insert(database.to_string(), client);
        }
        match connections.get_mut(database) {
            Some(client) => f(client),
            None => Err(Error::Generic(format!(
                "no superuser connection to database {database}"
            ))),
        }
    }

    fn add_unprivileged_user(&self) -> Result<(), Error> {
        let sql = format!(
            "CREATE USER {} WITH NOSUPERUSER NOCREATEDB NOCREATEROLE INHERIT NOREPLICATION CONNECTION LIMIT -1 PASSWORD '{}'",
            quote_identifier(&self.unprivileged),
            self.password.replace('\'', "''")
        );
        self.with_superuser(&self.default_database, |db| {
            db.batch_execute(&sql).map_err(Error::from)
        })
        .map_err(|e| e.context("failed to create unprivileged user"))
    }

    /// Create a database owned by the unprivileged role and connect to it as that role.
    ///
    /// `name` is sanitized first, so the database may be named differently; see
    /// [PostgresDatabase::name].
    pub fn create_database(&self, name: &str) -> Result<PostgresDatabase, Error> {
        let name = self.namer.valid_database_name(name);
        let quoted = quote_identifier(&name);
        let owner = quote_identifier(&self.unprivileged);

        #[cfg(feature = "tracing")]
        tracing::info!(database = %name, "Creating postgres database");

        let create = format!(
            "CREATE DATABASE {quoted} WITH OWNER = {owner} ENCODING = 'UTF8' \
             LC_COLLATE = 'en_US.utf8' LC_CTYPE = 'en_US.utf8' \
             TABLESPACE = pg_default CONNECTION LIMIT = -1"
        );
        self.with_superuser(&self.default_database, |db| {
            db.batch_execute(&create).map_err(Error::from)
        })
        .map_err(|e| e.context(format!("failed to create database={name}")))?;

        self.prepare_database(&name)?;

        let conn_str = self.conn_str(&self.unprivileged, &name);
        let client = connect(&conn_str).map_err(|e| {
            e.context(format!(
                "failed to connect to database={name} with {}",
                self.unprivileged
            ))
        })?;

        Ok(PostgresDatabase {
            client,
            name,
            schema: self.unprivileged.clone(),
            conn_str,
        })
    }

    /// Install the extension and the unprivileged schema in `name` over a one-off superuser
    /// connection, which is closed before returning.
    fn prepare_database(&self, name: &str) -> Result<(), Error> {
        let mut db = connect(&self.conn_str(&self.superuser, name))?;
        let owner = quote_identifier(&self.unprivileged);

        let prepared = db
            .batch_execute("CREATE EXTENSION IF NOT EXISTS btree_gist SCHEMA public")
            .map_err(|e| {
                Error::from(e)
                    .context(format!("failed to create extension btree_gist in database={name}"))
            })
            .and_then(|()| {
                db.batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {owner} AUTHORIZATION {owner}"
                ))
                .map_err(|e| {
                    Error::from(e).context(format!("failed to create schema {}", self.unprivileged))
                })
            });

        let closed = db
            .close()
            .map_err(|e| Error::from(e).context(format!("closing superuser connection to {name}")));
        prepared.and(closed)
    }

    /// Databases with a cached superuser connection.
    #[cfg(test)]
    pub(crate) fn superuser_databases(&self) -> Vec<String> {
        let mut databases: Vec<String> = self
            .superuser_connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        databases.sort();
        databases
    }

    /// Close every cached superuser connection. The first failure is returned after all
    /// connections have been closed.
    pub fn close(&self) -> Result<(), Error> {
        let connections: Vec<(String, Client)> = self
            .superuser_connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut first = None;
        for (database, client) in connections {
            if let Err(e) = client.close() {
                #[cfg(feature = "tracing")]
                tracing::error!(database = %database, error = %e, "Closing superuser connection failed");
                first.get_or_insert_with(|| Error::from(e).context(format!("closing {database}")));
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Close all connections and remove the container.
    pub fn terminate(self) -> Result<(), Error> {
        let closed = self.close();
        self.container.terminate()?;
        closed
    }
}
