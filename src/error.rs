//! Typed errors and stable error codes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("duplicate schema name: {0}")]
    DuplicateSchema(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum ShelfError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Binding(String),
    #[error("{op} params found more than one row. {hint}")]
    Ambiguous { op: &'static str, hint: &'static str },
    #[error("No Rows Updated")]
    NoRowsUpdated,
    #[error("No Rows Deleted")]
    NoRowsDeleted,
    #[error("EmptyResponse")]
    EmptyResponse,
    #[error("Duplicate method name {0}.")]
    DuplicateMethod(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Storage(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShelfError {
    pub(crate) fn ambiguous_obtain() -> Self {
        ShelfError::Ambiguous { op: "Obtain", hint: "Use browse instead" }
    }

    pub(crate) fn ambiguous_update() -> Self {
        ShelfError::Ambiguous { op: "Update", hint: "Use multiple option" }
    }

    pub(crate) fn ambiguous_delete() -> Self {
        ShelfError::Ambiguous { op: "Delete", hint: "Use multiple option" }
    }

    /// Stable machine-readable code, for hosts that surface errors over a transport.
    pub fn code(&self) -> &'static str {
        match self {
            ShelfError::Config(_) => "config_error",
            ShelfError::Binding(_) => "invalid_binding",
            ShelfError::Ambiguous { .. } => "ambiguous_match",
            ShelfError::NoRowsUpdated | ShelfError::NoRowsDeleted => "not_found",
            ShelfError::EmptyResponse => "empty_response",
            ShelfError::DuplicateMethod(_) => "duplicate_method",
            ShelfError::UnknownMethod(_) => "unknown_method",
            ShelfError::BadRequest(_) | ShelfError::Json(_) => "bad_request",
            ShelfError::Rejected(_) => "rejected",
            ShelfError::Unsupported(_) => "unsupported",
            ShelfError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    "not_found"
                } else {
                    "database_error"
                }
            }
            ShelfError::Storage(_) => "database_error",
            ShelfError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguity_messages() {
        assert_eq!(
            ShelfError::ambiguous_obtain().to_string(),
            "Obtain params found more than one row. Use browse instead"
        );
        assert_eq!(
            ShelfError::ambiguous_update().to_string(),
            "Update params found more than one row. Use multiple option"
        );
        assert_eq!(
            ShelfError::ambiguous_delete().to_string(),
            "Delete params found more than one row. Use multiple option"
        );
    }

    #[test]
    fn codes() {
        assert_eq!(ShelfError::NoRowsDeleted.code(), "not_found");
        assert_eq!(ShelfError::Db(sqlx::Error::RowNotFound).code(), "not_found");
        assert_eq!(ShelfError::DuplicateMethod("x".into()).to_string(), "Duplicate method name x.");
    }
}
