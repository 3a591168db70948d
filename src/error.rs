use std::sync::Arc;

use thiserror::Error;

use crate::entities::VariableType;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Client`](crate::Client) and its collaborators.
///
/// In production, most of these should be logged and otherwise ignored: the client always
/// leaves the caller with a usable default. They are surfaced so that misconfiguration can be
/// spotted during development.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The configuration source has no snapshot yet.
    #[error("no project config available")]
    ConfigurationMissing,

    /// The configuration source failed to provide a snapshot.
    #[error("project config unavailable: {0}")]
    ConfigurationUnavailable(String),

    /// The datafile could not be parsed.
    #[error("error parsing datafile: {0}")]
    DatafileParse(String),

    /// No feature with the given key in the current snapshot.
    #[error("feature {0:?} not found")]
    FeatureNotFound(String),

    /// No experiment with the given key in the current snapshot.
    #[error("experiment {0:?} not found")]
    ExperimentNotFound(String),

    /// No variable with the given key on the feature.
    #[error("variable {variable_key:?} not found on feature {feature_key:?}")]
    VariableNotFound {
        /// Key of the feature that was searched.
        feature_key: String,
        /// Requested variable key.
        variable_key: String,
    },

    /// No conversion event with the given key in the current snapshot.
    #[error("event {0:?} not found")]
    EventNotFound(String),

    /// Requested primitive type does not match the variable's declared type.
    #[error("invalid variable type (expected: {expected:?}, found: {found:?})")]
    InvalidVariableType {
        /// Type requested by the caller.
        expected: VariableType,
        /// Type declared in the configuration. `None` if unset.
        found: Option<VariableType>,
    },

    /// Raw variable value does not parse as its declared type.
    #[error("unable to parse {value:?} as {expected:?} for variable {key:?}")]
    VariableParse {
        /// Variable key.
        key: String,
        /// Raw value that failed to parse.
        value: String,
        /// Type the value was parsed as.
        expected: VariableType,
    },

    /// Diagnostic reported by the decision service.
    #[error("decision error: {0}")]
    Decision(String),

    /// A panic was caught at the client boundary. Displays as the panic message.
    #[error("{0}")]
    PanicRecovered(String),

    /// The client has been closed.
    #[error("client is closed")]
    ClientClosed,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::DatafileParse(value.to_string())
    }
}
