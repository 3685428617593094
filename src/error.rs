use thiserror::Error;

/// Every failure the codec, grammar, compiler, reconciler and dispatcher can raise.
///
/// All of them are reported at the point of detection; none are retried internally.
#[derive(Debug, Error)]
pub enum LiantError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("two objects with the same _id in payload: {0}")]
    DuplicateIdentity(String),

    #[error("unresolved references: {}", .0.join(", "))]
    DanglingReference(Vec<String>),

    #[error("grammar error at position {position}: {message}")]
    GrammarError { position: usize, message: String },

    #[error("unknown field '{field}' on {entity_type}")]
    UnknownField { entity_type: String, field: String },

    #[error("invalid cast to '{cast}' on {entity_type}")]
    InvalidCast { entity_type: String, cast: String },

    #[error("invalid hint '{op}{field}' on {entity_type}")]
    InvalidHint {
        entity_type: String,
        field: String,
        op: char,
    },

    #[error("null value not allowed for property {field} of {entity_type}")]
    NullNotAllowed { entity_type: String, field: String },

    #[error("could not convert value to target type for property {field} of {entity_type}: {reason}")]
    TypeCoercionFailed {
        entity_type: String,
        field: String,
        reason: String,
    },

    #[error("could not find {entity_type}[{key}] in store")]
    DanglingEntityReference { entity_type: String, key: String },

    #[error("{0} updates not supported")]
    Unsupported(&'static str),

    #[error("access denied: {0}")]
    AuthorizationDenied(String),

    #[error("version conflict on {entity_type}[{key}]")]
    Conflict { entity_type: String, key: String },

    #[error("route not found")]
    RouteNotFound,

    #[error("not found")]
    NotFound,

    #[error("not implemented, order by {}", .0.join(", "))]
    InvalidOrder(Vec<String>),

    #[error("transient {0} entity references itself while being encoded")]
    EncodeCycle(String),

    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("incomplete primary key for {0} at commit")]
    IncompleteKey(String),

    #[error("store error: {0}")]
    Store(String),
}

impl LiantError {
    pub fn coercion(entity_type: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::TypeCoercionFailed {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unknown_field(entity_type: &str, field: &str) -> Self {
        Self::UnknownField {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_cast(entity_type: &str, cast: &str) -> Self {
        Self::InvalidCast {
            entity_type: entity_type.to_string(),
            cast: cast.to_string(),
        }
    }

    /// True for failures caused by the client payload rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidJson(_)
                | Self::DuplicateIdentity(_)
                | Self::DanglingReference(_)
                | Self::GrammarError { .. }
                | Self::UnknownField { .. }
                | Self::InvalidCast { .. }
                | Self::InvalidHint { .. }
                | Self::NullNotAllowed { .. }
                | Self::TypeCoercionFailed { .. }
                | Self::DanglingEntityReference { .. }
                | Self::InvalidOrder(_)
                | Self::IncompleteKey(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LiantError>;
