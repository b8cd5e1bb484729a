// Status codes written by the dispatcher

/// Statuses the dispatcher, its result types and its fault mapping write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpStatus {
    Ok = 200,
    Created = 201,
    NoContent = 204,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    UnsupportedMediaType = 415,
    UnprocessableEntity = 422,
    InternalServerError = 500,
    ServiceUnavailable = 503,
}

const STATUSES: [(HttpStatus, &str); 10] = [
    (HttpStatus::Ok, "OK"),
    (HttpStatus::Created, "Created"),
    (HttpStatus::NoContent, "No Content"),
    (HttpStatus::BadRequest, "Bad Request"),
    (HttpStatus::NotFound, "Not Found"),
    (HttpStatus::MethodNotAllowed, "Method Not Allowed"),
    (HttpStatus::UnsupportedMediaType, "Unsupported Media Type"),
    (HttpStatus::UnprocessableEntity, "Unprocessable Entity"),
    (HttpStatus::InternalServerError, "Internal Server Error"),
    (HttpStatus::ServiceUnavailable, "Service Unavailable"),
];

impl HttpStatus {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn reason(&self) -> &'static str {
        STATUSES
            .iter()
            .find(|(status, _)| status == self)
            .map(|(_, reason)| *reason)
            .unwrap_or("")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code())
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code())
    }

    pub fn from_code(code: u16) -> Option<Self> {
        STATUSES
            .iter()
            .map(|(status, _)| *status)
            .find(|status| status.code() == code)
    }

    /// Whether `code` may be written as a fault status (4xx or 5xx)
    pub fn is_fault_code(code: u16) -> bool {
        (400..600).contains(&code)
    }
}

impl std::fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

impl From<HttpStatus> for u16 {
    fn from(status: HttpStatus) -> Self {
        status.code()
    }
}
