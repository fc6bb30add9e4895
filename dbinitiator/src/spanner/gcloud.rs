//!
//! # Native client adapters
//!
//! [SpannerAdmin] and [SpannerSession] backed by
//! [`google-cloud-spanner`](https://crates.io/crates/google-cloud-spanner), pointed at an
//! emulator endpoint. The client is asynchronous; every call is driven to completion on a
//! runtime owned by the adapter, so these types must not be used from inside another Tokio
//! runtime.

use super::{ColumnKind, Row, SpannerAdmin, SpannerSession, Value};
use crate::error::Error;
use crate::naming::DatabasePath;
use google_cloud_gax::conn::Environment;
use google_cloud_googleapis::spanner::admin::database::v1::{
    CreateDatabaseRequest, DropDatabaseRequest, UpdateDatabaseDdlRequest,
};
use google_cloud_googleapis::spanner::admin::instance::v1::{
    instance, CreateInstanceRequest, Instance,
};
use google_cloud_spanner::admin::client::Client as AdminClient;
use google_cloud_spanner::admin::AdminClientConfig;
use google_cloud_spanner::client::{Client, ClientConfig};
use google_cloud_spanner::statement::Statement;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Runtime;

const EMULATOR_INSTANCE_CONFIG: &str = "emulator-config";

fn spanner_error(operation: &str, error: impl std::fmt::Display) -> Error {
    Error::Spanner(format!("{operation}: {error}"))
}

/// Instance and database administration against an emulator.
pub struct EmulatorAdmin {
    runtime: Arc<Runtime>,
    admin: Mutex<Option<Arc<AdminClient>>>,
    endpoint: String,
}

impl std::fmt::Debug for EmulatorAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorAdmin")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl EmulatorAdmin {
    /// Connect to the emulator listening on `endpoint` (`host:port`).
    pub fn connect(endpoint: &str) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| spanner_error("building runtime", e))?;

        let config = AdminClientConfig {
            environment: Environment::Emulator(endpoint.to_string()),
            ..Default::default()
        };
        let admin = runtime
            .block_on(AdminClient::new(config))
            .map_err(|e| spanner_error("admin::client::Client::new()", e))?;

        Ok(Self {
            runtime: Arc::new(runtime),
            admin: Mutex::new(Some(Arc::new(admin))),
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn admin(&self) -> Result<Arc<AdminClient>, Error> {
        self.admin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Spanner(format!("admin client for {} is closed", self.endpoint)))
    }
}

fn create_instance_request(project_id: &str, instance_id: &str) -> CreateInstanceRequest {
    let parent = format!("projects/{project_id}");
    CreateInstanceRequest {
        parent: parent.clone(),
        instance_id: instance_id.to_string(),
        instance: Some(Instance {
            name: format!("{parent}/instances/{instance_id}"),
            config: format!("{parent}/instanceConfigs/{EMULATOR_INSTANCE_CONFIG}"),
            display_name: instance_id.to_string(),
            node_count: 1,
            ..Default::default()
        }),
    }
}

fn create_database_request(path: &DatabasePath) -> CreateDatabaseRequest {
    CreateDatabaseRequest {
        parent: path.instance_path(),
        create_statement: format!("CREATE DATABASE `{}`", path.database()),
        ..Default::default()
    }
}

fn drop_database_request(path: &DatabasePath) -> DropDatabaseRequest {
    DropDatabaseRequest {
        database: path.to_string(),
    }
}

impl SpannerAdmin for EmulatorAdmin {
    type Session = GcloudSession;

    fn create_instance(&self, project_id: &str, instance_id: &str) -> Result<(), Error> {
        let admin = self.admin()?;
        let request = create_instance_request(project_id, instance_id);

        let created = self.runtime.block_on(async {
            let mut op = admin
                .instance()
                .create_instance(request, None)
                .await
                .map_err(|e| spanner_error("InstanceAdminClient::create_instance()", e))?;
            op.wait(None)
                .await
                .map_err(|e| spanner_error("CreateInstanceOperation::wait()", e))
        })?;

        match created {
            Some(instance) if instance.state == instance::State::Ready as i32 => Ok(()),
            Some(instance) => Err(Error::Spanner(format!(
                "CreateInstanceOperation::wait(): state = {}",
                instance.state
            ))),
            None => Err(Error::Spanner(
                "CreateInstanceOperation::wait(): no instance returned".to_string(),
            )),
        }
    }

    fn create_database(&self, path: &DatabasePath) -> Result<(), Error> {
        let admin = self.admin()?;
        let request = create_database_request(path);

        self.runtime.block_on(async {
            let mut op = admin
                .database()
                .create_database(request, None)
                .await
                .map_err(|e| spanner_error("DatabaseAdminClient::create_database()", e))?;
            op.wait(None)
                .await
                .map_err(|e| spanner_error("CreateDatabaseOperation::wait()", e))?;
            Ok(())
        })
    }

    fn drop_database(&self, path: &DatabasePath) -> Result<(), Error> {
        let admin = self.admin()?;
        self.runtime
            .block_on(admin.database().drop_database(drop_database_request(path), None))
            .map(|_| ())
            .map_err(|e| spanner_error("DatabaseAdminClient::drop_database()", e))
    }

    fn connect(&self, path: &DatabasePath) -> Result<GcloudSession, Error> {
        let admin = self.admin()?;
        let config = ClientConfig {
            environment: Environment::Emulator(self.endpoint.clone()),
            ..Default::default()
        };
        let client = self
            .runtime
            .block_on(Client::new(path.to_string(), config))
            .map_err(|e| spanner_error("spanner::client::Client::new()", e))?;

        Ok(GcloudSession {
            runtime: Arc::clone(&self.runtime),
            admin,
            client: Mutex::new(Some(client)),
            database: path.to_string(),
        })
    }

    /// Sessions opened earlier keep their own handle to the admin client and stay usable.
    fn close(&self) -> Result<(), Error> {
        self.admin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// A data client and a schema client for one database.
pub struct GcloudSession {
    runtime: Arc<Runtime>,
    admin: Arc<AdminClient>,
    client: Mutex<Option<Client>>,
    database: String,
}

impl std::fmt::Debug for GcloudSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcloudSession")
            .field("database", &self.database)
            .finish()
    }
}

impl GcloudSession {
    fn with_client<T>(&self, f: impl FnOnce(&Client) -> Result<T, Error>) -> Result<T, Error> {
        let client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        match client.as_ref() {
            Some(client) => f(client),
            None => Err(Error::Spanner(format!("session for {} is closed", self.database))),
        }
    }
}

fn decode(row: &google_cloud_spanner::row::Row, columns: &[ColumnKind]) -> Result<Row, Error> {
    let mut values = Vec::with_capacity(columns.len());
    for (i, kind) in columns.iter().enumerate() {
        let value = match kind {
            ColumnKind::String => row
                .column::<Option<String>>(i)
                .map(|v| v.map_or(Value::Null, Value::String)),
            ColumnKind::Int64 => row
                .column::<Option<i64>>(i)
                .map(|v| v.map_or(Value::Null, Value::Int64)),
            ColumnKind::Bool => row
                .column::<Option<bool>>(i)
                .map(|v| v.map_or(Value::Null, Value::Bool)),
        }
        .map_err(|e| spanner_error(&format!("decoding column {i}"), e))?;
        values.push(value);
    }
    Ok(Row::new(values))
}

impl SpannerSession for GcloudSession {
    fn query(&self, sql: &str, columns: &[ColumnKind]) -> Result<Vec<Row>, Error> {
        self.with_client(|client| {
            self.runtime.block_on(async {
                let mut tx = client
                    .single()
                    .await
                    .map_err(|e| spanner_error("Client::single()", e))?;
                let mut iter = tx
                    .query(Statement::new(sql))
                    .await
                    .map_err(|e| spanner_error("ReadOnlyTransaction::query()", e))?;

                let mut rows = Vec::new();
                while let Some(row) = iter
                    .next()
                    .await
                    .map_err(|e| spanner_error("RowIterator::next()", e))?
                {
                    rows.push(decode(&row, columns)?);
                }
                Ok(rows)
            })
        })
    }

    fn execute_dml(&self, statements: &[String]) -> Result<(), Error> {
        let statements = statements.to_vec();
        self.with_client(|client| {
            self.runtime
                .block_on(client.read_write_transaction(|tx| {
                    let statements = statements.clone();
                    Box::pin(async move {
                        for sql in statements {
                            tx.update(Statement::new(sql)).await?;
                        }
                        Ok::<(), google_cloud_spanner::client::Error>(())
                    })
                }))
                .map(|_| ())
                .map_err(|e| spanner_error("Client::read_write_transaction()", e))
        })
    }

    fn update_ddl(&self, statements: &[String]) -> Result<(), Error> {
        let request = UpdateDatabaseDdlRequest {
            database: self.database.clone(),
            statements: statements.to_vec(),
            ..Default::default()
        };

        self.runtime.block_on(async {
            let mut op = self
                .admin
                .database()
                .update_database_ddl(request, None)
                .await
                .map_err(|e| spanner_error("DatabaseAdminClient::update_database_ddl()", e))?;
            op.wait(None)
                .await
                .map_err(|e| spanner_error("UpdateDatabaseDdlOperation::wait()", e))?;
            Ok(())
        })
    }

    fn close(&self) -> Result<(), Error> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            self.runtime.block_on(client.close());
        }
        Ok(())
    }
}
