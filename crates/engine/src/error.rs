use thiserror::Error;

/// The reconciliation error taxonomy. Variants are handling decisions, not
/// just sources: `RemoteGone` is a recreate cue, `RemoteTransient` is
/// retried with backoff, `Configuration` is surfaced synchronously to the
/// caller because only an operator can fix it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Payload missing a mandatory field (e.g. unresolvable owner). The
    /// event is rejected and logged, never retried automatically.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced pipeline/stage/admin is absent. The dependent operation
    /// is skipped; sibling operations still apply.
    #[error("not found: {0}")]
    NotFound(String),

    /// 429/5xx from the remote system after retries were exhausted.
    #[error("remote transient failure (status {status}): {context}")]
    RemoteTransient { status: u16, context: String },

    /// 404/410 from the remote system: the stored external id is stale.
    #[error("remote record gone: {0}")]
    RemoteGone(String),

    /// No pipeline/stage configured at all. Not recoverable without
    /// operator action.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] crosslink_storage::StorageError),

    #[error("core error: {0}")]
    Core(#[from] crosslink_core::CoreError),
}
