// Error types for the Trellis dispatcher

use crate::HttpStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Unsupported Media Type: {0}")]
    UnsupportedMediaType(String),

    #[error("Dependency injection error: {0}")]
    DependencyInjection(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Parameter binding failed: {0}")]
    Binding(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        self.http_status().code()
    }

    /// Get the HttpStatus enum for this error
    pub fn http_status(&self) -> HttpStatus {
        match self {
            Error::BadRequest(_) => HttpStatus::BadRequest,
            Error::Deserialization(_) => HttpStatus::BadRequest,
            Error::NotFound(_) => HttpStatus::NotFound,
            Error::MethodNotAllowed(_) => HttpStatus::MethodNotAllowed,
            Error::UnsupportedMediaType(_) => HttpStatus::UnsupportedMediaType,

            // Binding faults stay on 500 even when the input was the client's fault.
            Error::Binding(_) => HttpStatus::InternalServerError,

            _ => HttpStatus::InternalServerError,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.http_status().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.http_status().is_server_error()
    }

    /// Whether the request was aborted by its cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
