use thiserror::Error;

/// Errors surfaced by the version history service.
///
/// An unknown identity is not an error: an entity with no recorded
/// changes replays to an empty version list.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The change log store could not be reached or queried. The
    /// underlying failure is passed through unmodified and is not retried
    /// here; retry policy belongs to the caller.
    #[error("change log store unavailable")]
    StorageUnavailable(#[source] anyhow::Error),

    /// A stored snapshot does not decode as the requested entity type, or
    /// the supplied current value cannot be serialized for comparison.
    /// This is a programmer or configuration error, not a data state.
    #[error("cannot compare {entity_type} '{entity_id}': {reason}")]
    InvalidComparison {
        entity_type: String,
        entity_id: String,
        reason: String,
    },
}
