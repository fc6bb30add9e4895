//!
//! # Container provisioning
//!
//! A thin layer over [testcontainers]' blocking runner. The engines only need three things from a
//! running container: its host, the host port mapped to the engine's port, and a way to remove it.

use crate::error::Error;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, ContainerRequest, GenericImage, ImageExt};

/// Which output stream a readiness message is expected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    Either,
}

/// Everything needed to start one engine container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    image: String,
    tag: String,
    port: u16,
    ready: Vec<(LogStream, String)>,
    env: Vec<(String, String)>,
    cmd: Vec<String>,
    startup_timeout: Option<Duration>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, tag: impl Into<String>, port: u16) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
            port,
            ready: Vec::new(),
            env: Vec::new(),
            cmd: Vec::new(),
            startup_timeout: None,
        }
    }

    /// Wait for `message` on `stream` before the container counts as started. Conditions are
    /// awaited in the order they were added.
    pub fn with_ready_log(mut self, stream: LogStream, message: impl Into<String>) -> Self {
        self.ready.push((stream, message.into()));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// `<image>:<tag>`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// A started container and the coordinates to reach it.
pub struct ProvisionedContainer {
    container: Container<GenericImage>,
    host: String,
    port: u16,
}

impl std::fmt::Debug for ProvisionedContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedContainer")
            .field("id", &self.container.id())
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl ProvisionedContainer {
    /// Start a container from `spec` and block until every readiness condition is met.
    pub fn start(spec: &ContainerSpec) -> Result<Self, Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("container_start", image = %spec.image_ref()).entered();

        let mut image = GenericImage::new(spec.image.as_str(), spec.tag.as_str())
            .with_exposed_port(spec.port.tcp());
        for (stream, message) in &spec.ready {
            let wait = match stream {
                LogStream::Stdout => WaitFor::message_on_stdout(message.as_str()),
                LogStream::Stderr => WaitFor::message_on_stderr(message.as_str()),
                LogStream::Either => WaitFor::message_on_either_std(message.as_str()),
            };
            image = image.with_wait_for(wait);
        }

        let mut request = ContainerRequest::from(image);
        for (key, value) in &spec.env {
            request = request.with_env_var(key.as_str(), value.as_str());
        }
        if !spec.cmd.is_empty() {
            request = request.with_cmd(spec.cmd.clone());
        }
        if let Some(timeout) = spec.startup_timeout {
            request = request.with_startup_timeout(timeout);
        }

        let container = request
            .start()
            .map_err(|e| Error::from(e).context(format!("starting {}", spec.image_ref())))?;
        let host = container
            .get_host()
            .map_err(|e| Error::from(e).context("failed to get host for container"))?
            .to_string();
        let port = container.get_host_port_ipv4(spec.port).map_err(|e| {
            Error::from(e).context(format!(
                "failed to get external port for exposed port {}",
                spec.port
            ))
        })?;

        #[cfg(feature = "tracing")]
        tracing::info!(host = %host, port, "Container started");

        Ok(Self {
            container,
            host,
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host port mapped to the spec's exposed port.
    pub fn mapped_port(&self) -> u16 {
        self.port
    }

    /// `<host>:<port>`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stop and remove the container.
    pub fn terminate(self) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(id = %self.container.id(), "Removing container");

        self.container
            .rm()
            .map_err(|e| Error::from(e).context("removing container"))
    }
}
