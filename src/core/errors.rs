use http::StatusCode;
use spin_sdk::http::Response;
use std::fmt;

/// Why a bearer token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTokenError {
    NoToken,
    Expired,
    Invalid,
}

impl AuthTokenError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthTokenError::NoToken => "NoToken",
            AuthTokenError::Expired => "Expired",
            AuthTokenError::Invalid => "Invalid",
        }
    }
}

impl fmt::Display for AuthTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthTokenError::NoToken => write!(f, "No token provided, authorization denied"),
            AuthTokenError::Expired => write!(f, "Token expired"),
            AuthTokenError::Invalid => write!(f, "Invalid token"),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    DuplicateIdentity,
    InvalidCredential,
    SelfReference,
    NotFound(String),
    AlreadyLiked,
    NotLiked,
    EmptyContent,
    MissingMedia,
    Upload(String),
    AuthToken(AuthTokenError),
    Forbidden,
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{} not found", what))
    }

    /// Stable machine-readable error kind used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "ValidationError",
            ApiError::DuplicateIdentity => "DuplicateIdentity",
            ApiError::InvalidCredential => "InvalidCredential",
            ApiError::SelfReference => "SelfReferenceError",
            ApiError::NotFound(_) => "NotFound",
            ApiError::AlreadyLiked => "AlreadyLiked",
            ApiError::NotLiked => "NotLiked",
            ApiError::EmptyContent => "EmptyContent",
            ApiError::MissingMedia => "MissingMedia",
            ApiError::Upload(_) => "UploadError",
            ApiError::AuthToken(e) => e.kind(),
            ApiError::Forbidden => "Forbidden",
            ApiError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::DuplicateIdentity
            | ApiError::SelfReference
            | ApiError::AlreadyLiked
            | ApiError::NotLiked
            | ApiError::EmptyContent
            | ApiError::MissingMedia => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredential | ApiError::AuthToken(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upload(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "{}", msg),
            ApiError::DuplicateIdentity => write!(f, "User already exists"),
            ApiError::InvalidCredential => write!(f, "Invalid email or password"),
            ApiError::SelfReference => write!(f, "Cannot follow or unfollow yourself"),
            ApiError::NotFound(msg) => write!(f, "{}", msg),
            ApiError::AlreadyLiked => write!(f, "You already liked this post"),
            ApiError::NotLiked => write!(f, "You haven't liked this post"),
            ApiError::EmptyContent => write!(f, "Comment content is required"),
            ApiError::MissingMedia => write!(f, "Media is required"),
            ApiError::Upload(msg) => write!(f, "Media upload failed: {}", msg),
            ApiError::AuthToken(e) => write!(f, "{}", e),
            ApiError::Forbidden => write!(f, "Forbidden"),
            ApiError::Internal(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        let body = serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        });
        Response::builder()
            .status(err.status().as_u16())
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(&body).unwrap_or_default())
            .build()
    }
}

impl std::error::Error for ApiError {}

impl From<AuthTokenError> for ApiError {
    fn from(err: AuthTokenError) -> Self {
        ApiError::AuthToken(err)
    }
}

// Store and serialization failures surface as internal errors
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Validation(format!("Malformed request body: {}", err))
    }
}
