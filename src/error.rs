#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] sea_orm::DbErr),

    #[error("Receipt validation failed: {0}")]
    Validation(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid entitlement state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Stable code attached to structured log events
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileError::Store(_) => "STORE_ERROR",
            ReconcileError::Validation(_) => "VALIDATION_ERROR",
            ReconcileError::Catalog(_) => "CATALOG_ERROR",
            ReconcileError::NotFound(_) => "NOT_FOUND",
            ReconcileError::Conflict(_) => "CONFLICT",
            ReconcileError::InvalidState(_) => "INVALID_STATE",
            ReconcileError::Config(_) => "CONFIG_ERROR",
            ReconcileError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the next scheduled run can be expected to succeed without
    /// anyone touching the data.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Store(_) | ReconcileError::Validation(_) | ReconcileError::Internal(_)
        )
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, ReconcileError>;
