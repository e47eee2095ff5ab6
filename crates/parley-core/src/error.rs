use thiserror::Error;

pub type ParleyResult<T> = Result<T, ParleyError>;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("exec error: {0}")]
    Exec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("mode error: {0}")]
    Mode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyError {
    /// True when the error maps to a missing entity (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ParleyError::NotFound(_))
    }
}
