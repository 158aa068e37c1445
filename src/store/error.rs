use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The record points at a parent that does not exist.
    #[error("missing referenced record: {0}")]
    MissingReference(String),

    #[error("store lock poisoned")]
    Poisoned,
}
