use super::database::SpannerDatabase;
use super::{SpannerAdmin, DEFAULT_INSTANCE_ID, DEFAULT_PROJECT_ID, EMULATOR_IMAGE, EMULATOR_PORT};
use crate::error::Error;
use crate::naming::{DatabaseNamer, DatabasePath, Engine};
use crate::provision::{ContainerSpec, LogStream, ProvisionedContainer};

/// A Spanner emulator in a container, with one instance that holds every test database.
pub struct SpannerContainer<A: SpannerAdmin> {
    container: ProvisionedContainer,
    admin: A,
    project_id: String,
    instance_id: String,
    namer: DatabaseNamer,
}

impl<A: SpannerAdmin> std::fmt::Debug for SpannerContainer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpannerContainer")
            .field("container", &self.container)
            .field("project_id", &self.project_id)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl<A: SpannerAdmin> SpannerContainer<A> {
    /// The container started by [SpannerContainer::start].
    pub fn container_spec(image_version: &str) -> ContainerSpec {
        ContainerSpec::new(EMULATOR_IMAGE, image_version, EMULATOR_PORT)
            .with_ready_log(LogStream::Either, "Cloud Spanner emulator running")
    }

    /// Start the emulator, connect to it with `connect_admin(endpoint)`, and create the
    /// default instance.
    pub fn start<F>(image_version: &str, connect_admin: F) -> Result<Self, Error>
    where
        F: FnOnce(&str) -> Result<A, Error>,
    {
        let container = ProvisionedContainer::start(&Self::container_spec(image_version))?;
        let endpoint = container.endpoint();

        let admin = match connect_admin(&endpoint) {
            Ok(admin) => admin,
            Err(error) => {
                return Err(discard(container, error.context("connecting to spanner emulator")))
            }
        };

        if let Err(error) = admin.create_instance(DEFAULT_PROJECT_ID, DEFAULT_INSTANCE_ID) {
            let error = error.context("failed to create spanner instance");
            let error = match admin.close() {
                Ok(()) => error,
                Err(close) => close.context(error.to_string()),
            };
            return Err(discard(container, error));
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            endpoint = %endpoint,
            project = DEFAULT_PROJECT_ID,
            instance = DEFAULT_INSTANCE_ID,
            "Spanner emulator ready"
        );

        Ok(Self {
            container,
            admin,
            project_id: DEFAULT_PROJECT_ID.to_string(),
            instance_id: DEFAULT_INSTANCE_ID.to_string(),
            namer: DatabaseNamer::new(Engine::Spanner),
        })
    }

    /// `host:port` of the emulator's gRPC endpoint.
    pub fn endpoint(&self) -> String {
        self.container.endpoint()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    /// Create a database for one test. `name` is sanitized first, so the database may be
    /// named differently; see [SpannerDatabase::name].
    pub fn create_test_database(&self, name: &str) -> Result<SpannerDatabase<'_, A>, Error> {
        let name = self.namer.valid_database_name(name);
        let path = DatabasePath::new(&self.project_id, &self.instance_id, &name);

        SpannerDatabase::create(&self.admin, path)
            .map_err(|e| e.context(format!("failed to create spanner database {name}")))
    }

    /// Release the admin clients. The container keeps running.
    pub fn close(&self) -> Result<(), Error> {
        self.admin.close()
    }

    /// Release the admin clients and remove the container.
    pub fn terminate(self) -> Result<(), Error> {
        let closed = self.admin.close();
        self.container.terminate()?;
        closed
    }
}

/// Remove a container whose setup failed, keeping `error` as the reported failure.
fn discard(container: ProvisionedContainer, error: Error) -> Error {
    if let Err(_e) = container.terminate() {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %_e, "Removing spanner emulator container failed");
    }
    error
}

#[cfg(feature = "gcloud")]
impl SpannerContainer<super::gcloud::EmulatorAdmin> {
    /// Start `gcr.io/cloud-spanner-emulator/emulator:<image_version>` and connect to it with
    /// the native client.
    pub fn new(image_version: &str) -> Result<Self, Error> {
        Self::start(image_version, super::gcloud::EmulatorAdmin::connect)
    }
}
