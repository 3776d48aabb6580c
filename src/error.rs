use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object already exists: {0}")]
    ObjectAlreadyExists(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("KV transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{op} failed")]
    Persistence {
        op: &'static str,
        #[source]
        source: Box<StoreError>,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
