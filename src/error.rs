//! Error taxonomy for translation and execution.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

/// Every failure the engine can surface. None of these are retried or
/// papered over; translation errors always happen before any SQL is sent.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A node kind no stage knows how to handle, or a construct the active
    /// dialect cannot express.
    #[error("unsupported expression: {node}{}", dialect.as_ref().map(|d| format!(" (dialect {d})")).unwrap_or_default())]
    Unsupported {
        node: String,
        dialect: Option<String>,
    },

    /// Ambiguous, duplicate or unresolvable mapping information.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// `Single`/`First` style aggregators saw the wrong number of rows.
    #[error("sequence cardinality error: {0}")]
    Cardinality(String),

    /// Once-only resources reused, or connections/transactions mismatched.
    #[error("resource lifecycle error: {0}")]
    ResourceLifecycle(String),

    /// A column reached the formatter without a FROM source binding it.
    #[error("column '{name}' is not bound to any source in scope (alias {alias})")]
    UnboundColumn { alias: String, name: String },

    #[error("cannot order changes: {0}")]
    CyclicDependency(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    /// Failure reported by the executor, passed through untouched.
    #[error(transparent)]
    Execution(Box<dyn std::error::Error + Send + Sync>),

    /// A broken internal invariant (a pass produced a tree shape another
    /// pass does not accept).
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn unsupported(node: impl Into<String>) -> Self {
        QueryError::Unsupported { node: node.into(), dialect: None }
    }

    pub fn unsupported_in(node: impl Into<String>, dialect: impl Into<String>) -> Self {
        QueryError::Unsupported { node: node.into(), dialect: Some(dialect.into()) }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        QueryError::Mapping(message.into())
    }

    pub fn cardinality(message: impl Into<String>) -> Self {
        QueryError::Cardinality(message.into())
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        QueryError::ResourceLifecycle(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        QueryError::Internal(message.into())
    }

    pub fn execution<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        QueryError::Execution(Box::new(err))
    }

    pub fn is_translation_error(&self) -> bool {
        matches!(
            self,
            QueryError::Unsupported { .. } | QueryError::Mapping(_) | QueryError::UnboundColumn { .. }
        )
    }
}
