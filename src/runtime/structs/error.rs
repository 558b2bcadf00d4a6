use std::sync::Arc;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("cannot allocate static storage for `{type_name}`")]
    AllocationFailure { type_name: Arc<str> },
    #[error("static initialization bookkeeping is inconsistent: {context}")]
    InvariantViolation { context: String },
    #[error("cannot compile `{method}`")]
    Compilation {
        method: Arc<str>,
        #[source]
        source: BoxError,
    },
    #[error("static constructor `{method}` failed")]
    Execution {
        method: Arc<str>,
        #[source]
        source: BoxError,
    },
    #[error("malformed static object symbol: {0}")]
    MalformedSymbol(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl InitError {
    pub(crate) fn invariant(context: impl Into<String>) -> Self {
        let context = context.into();
        tracing::error!(%context, "static initialization invariant violated");
        InitError::InvariantViolation { context }
    }

    /// Fatal errors leave the runtime without usable static state; the caller is
    /// expected to shut the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InitError::AllocationFailure { .. } | InitError::InvariantViolation { .. }
        )
    }
}

pub type InitResult<T> = ::std::result::Result<T, InitError>;
