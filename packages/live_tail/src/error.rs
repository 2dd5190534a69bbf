use std::io;
use std::path::PathBuf;

use service_lifecycle::LifecycleError;

/// Errors surfaced synchronously by [`Tail`](crate::Tail) operations.
///
/// Failures inside the follow loop never show up here; they are logged and
/// the loop keeps going.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// The operation is not allowed from the tail's current state.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("cannot open {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The stream was never handed back by the previous follow thread,
    /// either because it did not exit in time or because it panicked.
    #[error("stream source is no longer available")]
    StreamUnavailable,

    #[error("failed to spawn follow thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to load tail configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("invalid tail configuration: {0}")]
    InvalidConfig(String),
}

impl TailError {
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, Self::Lifecycle(err) if err.is_illegal_transition())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, TailError>;
