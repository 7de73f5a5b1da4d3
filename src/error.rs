use stacked_errors::StackableErr;

/// Result alias used throughout the crate. Context is accumulated with
/// [`StackableErr`] as errors propagate, rather than discarded at the first
/// `?`.
pub type Result<T> = stacked_errors::Result<T>;

pub use stacked_errors::{Error, StackableErr};

/// The root error taxonomy. Every fatal condition the translator or executor
/// can raise is one of these kinds; callers match on `kind` rather than on
/// message text.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorKind {
    /// Zero stages, a duplicate stage id, or a stage referencing an unknown
    /// earlier id.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A plan with no stages at all. A sub-case of `InvalidPlan` that gets
    /// its own variant because it is independently testable (§8).
    #[error("empty plan: plan has no stages")]
    EmptyPlan,

    /// An `Input` selected zero variants, or more than one.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `Input::Stage` named an id that has not been assembled yet (or at
    /// all).
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// `Input::Local` named a context not present in the Context Store.
    #[error("unknown context: {0}")]
    UnknownContext(String),

    /// Materializing an in-memory context to disk failed.
    #[error("context materialization failed: {0}")]
    ContextMaterialization(String),

    /// The solver could not resolve an image's OCI config (not found, auth,
    /// platform mismatch).
    #[error("image metadata resolve failed: {0}")]
    ImageMetadataResolve(String),

    /// The solver rejected the graph or failed during execution.
    #[error("solve failed: {0}")]
    Solve(String),

    /// The Operation Translator encountered an `Op` variant it does not
    /// know how to translate.
    #[error("unsupported op: {0}")]
    UnsupportedOp(String),

    /// The build was canceled via its cancellation token.
    #[error("build canceled")]
    Canceled,
}

impl ErrorKind {
    /// Raises this kind as an error, wrapped for the stacked-error chain.
    pub fn raise<T>(self) -> Result<T> {
        Err(Error::from_err(self))
    }
}

/// Convenience extension for attaching a stage id to an in-flight error, the
/// way §7 requires ("Errors include: the stage id (when applicable)...").
pub trait StageErrExt<T> {
    fn stage_err(self, stage_id: &str) -> Result<T>;
}

impl<T> StageErrExt<T> for Result<T> {
    fn stage_err(self, stage_id: &str) -> Result<T> {
        self.stack_err_with_locationless(|| format!("while assembling stage \"{stage_id}\""))
    }
}
