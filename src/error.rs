use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Request Timeout")]
    RequestTimeout,
    #[error("Request Entity Too Large")]
    RequestEntityTooLarge,
    #[error("Request Header Fields Too Large")]
    RequestHeaderFieldsTooLarge,
    #[error("Too many requests")]
    TooManyRequests,
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Panic: {0}")]
    PanicError(String),
    #[error("{message}")]
    Status { status: u16, message: String },
}

impl ServerError {
    /// Builds an error carrying an arbitrary status code.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        ServerError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::BadRequest(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::MethodNotAllowed => 405,
            ServerError::RequestTimeout => 408,
            ServerError::Conflict(_) => 409,
            ServerError::RequestEntityTooLarge => 413,
            ServerError::ParseError(_) => 422,
            ServerError::TooManyRequests => 429,
            ServerError::RequestHeaderFieldsTooLarge => 431,
            ServerError::Status { status, .. } => *status,
            ServerError::IoError(_)
            | ServerError::InternalError(_)
            | ServerError::PanicError(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServerError::NotFound(_))
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Failures while reading a request off the wire, before any routing.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request head exceeds the read buffer")]
    SmallBuffer,
    #[error("request body exceeds the configured limit")]
    BodyTooLarge,
    #[error("timed out reading the request")]
    Timeout,
    #[error("only GET requests are accepted")]
    GetOnly,
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn into_server_error(self) -> ServerError {
        match self {
            TransportError::SmallBuffer => ServerError::RequestHeaderFieldsTooLarge,
            TransportError::BodyTooLarge => ServerError::RequestEntityTooLarge,
            TransportError::Timeout => ServerError::RequestTimeout,
            TransportError::GetOnly => ServerError::MethodNotAllowed,
            TransportError::Malformed(_) | TransportError::Io(_) => {
                ServerError::new(400, "Bad Request")
            }
        }
    }
}
