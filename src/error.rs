//! Error taxonomy shared across the crate.

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error wrapping the per-domain taxonomies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Case(#[from] CaseError),

    #[error(transparent)]
    Gateway(#[from] crate::gateway::GatewayError),

    #[error(transparent)]
    Specialist(#[from] crate::specialist::SpecialistError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Database infrastructure errors. Every store operation fails closed when
/// the database is unreachable; callers treat these as retryable.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("case store unavailable: {0}")]
    Unavailable(String),
}

/// Case lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("invalid case state in database: {0}")]
    InvalidState(String),
}
