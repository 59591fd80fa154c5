//! Errors surfaced by specialization, abstraction and flow parsing.
//!
//! "No match" inside the search is not an error: combinators return an empty
//! candidate list. Only the variants below escape to callers.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Undefined domain on field '{0}'")]
    UndefinedDomain(String),
    #[error("Relation dependency cycle: {0}")]
    DependencyCycle(String),
    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),
    #[error("Invalid grammar: {0}")]
    InvalidGrammar(String),
    #[error("Unsatisfiable relation at '{location}': {reason}")]
    UnsatisfiableRelation { location: String, reason: String },
    #[error("Conflicting binding for '{0}'")]
    ConflictingBinding(String),
    #[error("Enumeration limit exceeded at '{location}' (limit {limit})")]
    EnumerationLimitExceeded { location: String, limit: usize },
    #[error("No match for '{0}'")]
    NoMatch(String),
}

impl EngineError {
    /// Structural faults of the grammar itself; retrying never helps.
    pub fn is_grammar_error(&self) -> bool {
        matches!(
            self,
            EngineError::UndefinedDomain(_)
                | EngineError::DependencyCycle(_)
                | EngineError::UnknownDependency(_)
                | EngineError::InvalidGrammar(_)
        )
    }

    pub(crate) fn unsatisfiable(location: &str, reason: impl Into<String>) -> Self {
        EngineError::UnsatisfiableRelation {
            location: location.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn limit(location: &str, limit: usize) -> Self {
        EngineError::EnumerationLimitExceeded {
            location: location.to_string(),
            limit,
        }
    }
}
