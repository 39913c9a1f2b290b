#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound {
        entity: &'static str,
        id: uuid::Uuid,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
