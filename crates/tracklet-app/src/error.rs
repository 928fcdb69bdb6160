//! Application-level error type for the bootstrap path.

use thiserror::Error;

/// Convenience alias for bootstrap results.
pub type AppResult<T> = Result<T, AppError>;

/// Failures that abort the service.
#[derive(Debug, Error)]
pub enum AppError {
    /// The work directory could not be prepared.
    #[error("failed to prepare work directory during {operation}")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// A subsystem failed to initialise.
    #[error("{component} failed to initialise")]
    Component {
        /// Component label.
        component: &'static str,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// The definition catalog is unusable.
    #[error("site catalog is unusable: {message}")]
    Catalog {
        /// Description of the fatal catalog state.
        message: String,
    },
}

impl AppError {
    pub(crate) fn component(
        component: &'static str,
    ) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Component { component, source }
    }
}
