use thiserror::Error;

/// Persistence failures surfaced by the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("record not found")]
    NotFound,

    #[error("invalid input: {0}")]
    Invalid(String),
}

impl From<deadpool::managed::PoolError<libsql::Error>> for StoreError {
    fn from(err: deadpool::managed::PoolError<libsql::Error>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(inner) => StoreError::Query(inner),
            other => StoreError::Pool(other.to_string()),
        }
    }
}

impl From<uuid::Error> for StoreError {
    fn from(err: uuid::Error) -> Self {
        StoreError::Corrupt(format!("bad uuid: {err}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(format!("bad json: {err}"))
    }
}
