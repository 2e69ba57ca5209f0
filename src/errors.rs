use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("PARSE_FAILURE: {0}")]
    Parse(String),
    #[error("LOCK_FAILURE: {0}")]
    Lock(String),
    #[error("INVALID_INPUT: {0}")]
    Invalid(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_FAILURE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Parse(_) => "PARSE_FAILURE",
            Self::Lock(_) => "LOCK_FAILURE",
            Self::Invalid(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(value.to_string())
        } else {
            Self::Io(value.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(value: csv::Error) -> Self {
        match value.kind() {
            csv::ErrorKind::Io(_) => Self::Io(value.to_string()),
            _ => Self::Parse(value.to_string()),
        }
    }
}

impl From<notify::Error> for AppError {
    fn from(value: notify::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
