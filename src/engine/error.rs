#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A write was rejected by a table constraint; `constraint` names which one.
    ConstraintViolation {
        constraint: &'static str,
        detail: String,
    },
    /// The engine was closed; no new transactions, reads or listeners.
    Closed,
    WalError(String),
}

impl EngineError {
    /// Name of the violated constraint, if this is a constraint violation.
    pub fn constraint(&self) -> Option<&'static str> {
        match self {
            EngineError::ConstraintViolation { constraint, .. } => Some(*constraint),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ConstraintViolation { constraint, detail } => {
                write!(f, "violates constraint \"{constraint}\": {detail}")
            }
            EngineError::Closed => write!(f, "engine closed"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
