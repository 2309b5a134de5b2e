// Error types for the Gantry framework

use crate::HttpStatus;
use thiserror::Error;

/// Errors produced by the container and dispatcher core.
///
/// Startup-fatal conditions (`MissingModuleMetadata`, `CircularDependency`)
/// abort bootstrap. Everything else surfaces as a request-scoped failure and
/// is converted to a response by the dispatcher.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing module metadata: {0}")]
    MissingModuleMetadata(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The standardized application error. Raised by handlers that want the
    /// envelope to carry a domain code; transported with HTTP status 200 so
    /// clients branch on the envelope, not the transport status.
    #[error("{message}")]
    App { code: u16, message: String },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build the standardized application error.
    pub fn app(code: u16, message: impl Into<String>) -> Self {
        Error::App {
            code,
            message: message.into(),
        }
    }

    /// Whether this error aborts application startup.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingModuleMetadata(_) | Error::CircularDependency(_)
        )
    }

    /// HTTP status used when this error reaches the transport unshaped.
    ///
    /// The dispatcher treats [`Error::App`] specially (status 200 with the
    /// error envelope); this mapping covers everything else.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) => HttpStatus::NotFound.code(),
            _ => HttpStatus::InternalServerError.code(),
        }
    }

    /// The code carried inside the error envelope.
    pub fn envelope_code(&self) -> u16 {
        match self {
            Error::App { code, .. } => *code,
            _ => HttpStatus::InternalServerError.code(),
        }
    }
}
