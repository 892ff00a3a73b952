use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};

use thiserror::Error;

use crate::Stage;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a monoflat-related operation.
pub type MonoflatResult<T> = Result<T, MonoflatError>;

/// An error that occurred while flattening an image.
#[derive(pretty_error_debug::Debug, Error)]
pub enum MonoflatError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// The layer or image identifier is unknown to the runtime.
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime (or its storage) could not be reached.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// A layer could not be copied into the scratch tree.
    #[error("failed to copy layer {layer} at {}: {source}", path.display())]
    CopyFailed {
        /// The layer being applied.
        layer: String,

        /// The path that could not be copied.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// There are fewer than two layers, so there is nothing to flatten.
    #[error("image has {0} layer(s), need a base and at least one derived layer")]
    EmptyChain(usize),

    /// The history returned by the runtime does not form a valid chain.
    #[error("invalid layer chain: {0}")]
    InvalidChain(String),

    /// A whiteout target or marker could not be removed.
    #[error("failed to resolve whiteout {}: {source}", path.display())]
    WhiteoutFailed {
        /// The path that could not be removed.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The merged tree could not be archived.
    #[error("failed to archive {}: {source}", path.display())]
    ArchiveFailed {
        /// The source directory being archived.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The image builder did not produce an image.
    #[error("image build failed: {0}")]
    BuildFailed(String),

    /// An error that occurred while talking to the runtime over its unix socket.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// An error that occurred while talking to the runtime's legacy endpoint.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// A runtime response could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required binary could not be located.
    #[error("binary not found: {0}")]
    BinaryNotFound(#[from] which::Error),

    /// A join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A pipeline stage failed.
    #[error("{stage} failed: {source}")]
    StageFailed {
        /// The stage that failed.
        stage: Stage,

        /// The error raised by the stage.
        #[source]
        source: Box<MonoflatError>,
    },
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MonoflatError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> MonoflatError {
        MonoflatError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Tags the error with the pipeline stage it was raised in.
    pub fn at(self, stage: Stage) -> MonoflatError {
        match self {
            MonoflatError::StageFailed { .. } => self,
            error => MonoflatError::StageFailed {
                stage,
                source: Box::new(error),
            },
        }
    }

    /// Returns the stage this error was raised in, if it has been tagged.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            MonoflatError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `MonoflatResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> MonoflatResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
