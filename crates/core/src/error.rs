use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unknown field {field:?} for {entity}")]
    UnknownField { entity: String, field: String },

    #[error("unknown relation {relation:?} for {entity}")]
    UnknownRelation { entity: String, relation: String },

    #[error("unsupported entity: {0}")]
    UnsupportedEntity(String),
}
