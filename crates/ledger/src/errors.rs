#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("user handle '{0}' already exists")]
    DuplicateHandle(String),
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("query error: {0}")]
    Query(#[source] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
