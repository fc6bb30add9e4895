/// Error type for the dbinitiator crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    #[cfg(feature = "containers")]
    #[error("{0}")]
    Container(#[from] testcontainers::TestcontainersError),
    /// An error reported by the Spanner native client.
    #[error("spanner: {0}")]
    Spanner(String),
    /// The migration source could not be opened or read.
    #[error("migration source {url}: {reason}")]
    Source { url: String, reason: String },
    /// A previous run left the version track mid-migration.
    #[error("dirty database version {}: fix and force version", display_version(.version))]
    Dirty { version: Option<u64> },
    /// A script cannot be submitted to the target engine as written.
    #[error("invalid migration statement: {0}")]
    Statement(String),
    #[error("{context}: {error}")]
    Context {
        context: String,
        #[source]
        error: Box<Error>,
    },
    /// A migration operation failed for the given source.
    #[error("{operation}: {source_url}: {error}")]
    Migration {
        operation: &'static str,
        source_url: String,
        #[source]
        error: Box<Error>,
    },
    /// Releasing a resource failed. Any error that happened before the release is kept in
    /// `primary` and is rendered first.
    #[error("{}", display_release(.resource, .source_url, .error, .primary.as_deref()))]
    Release {
        resource: &'static str,
        source_url: String,
        #[source]
        error: Box<Error>,
        primary: Option<Box<Error>>,
    },
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Wrap this error with the operation and identifier that produced it.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            error: Box::new(self),
        }
    }

    /// True when this error, or any error it wraps, reports a dirty version track.
    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Dirty { .. } => true,
            Self::Context { error, .. } | Self::Migration { error, .. } => error.is_dirty(),
            Self::Release { error, primary, .. } => {
                error.is_dirty() || primary.as_ref().is_some_and(|p| p.is_dirty())
            }
            _ => false,
        }
    }

    /// True when this error, or any error it wraps, marks an unimplemented operation.
    pub fn is_not_implemented(&self) -> bool {
        match self {
            Self::NotImplemented(_) => true,
            Self::Context { error, .. } | Self::Migration { error, .. } => {
                error.is_not_implemented()
            }
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

fn display_version(version: &Option<u64>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "nil".to_string(),
    }
}

fn display_release(
    resource: &str,
    source_url: &str,
    error: &Error,
    primary: Option<&Error>,
) -> String {
    match primary {
        Some(primary) => format!(
            "{primary}; then closing migration {resource} failed: {source_url}: {error}"
        ),
        None => format!("closing migration {resource} failed: {source_url}: {error}"),
    }
}
