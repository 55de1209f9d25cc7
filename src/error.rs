//! Error types with fix suggestions (v0.1)

use thiserror::Error;

use crate::engine::EngineError;

/// Trait for errors that provide fix suggestions
pub trait Hint {
    fn hint(&self) -> Option<&str>;
}

/// Library-level errors. Build and restore *failures* are not errors; they
/// come back as `succeeded = false` on the outcome.
#[derive(Error, Debug)]
pub enum KilnError {
    /// The engine raised an exceptional condition; propagated unchanged
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("descriptor error: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error("conflicting render options: {0}")]
    RenderConfig(String),
}

impl Hint for KilnError {
    fn hint(&self) -> Option<&str> {
        match self {
            KilnError::Engine(EngineError::AlreadyActive) => {
                Some("One build at a time per engine; use a separate engine for parallel builds")
            }
            KilnError::Engine(_) => None,
            KilnError::Io(_) => Some("Check the workspace path and permissions"),
            KilnError::Descriptor(_) => Some("Regenerate the descriptor with ProjectSpec::save"),
            KilnError::RenderConfig(_) => {
                Some("Pick one of errors_only / warnings_only, not both")
            }
        }
    }
}
